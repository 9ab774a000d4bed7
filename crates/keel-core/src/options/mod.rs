//! Options aggregation module.
//!
//! Features declare their command line options into a shared
//! [`ProgramOptions`] value during the collect-options phase. Parsing is
//! delegated to a runtime-built [`clap::Command`]; keel keeps the section
//! and option metadata itself so it can render sectioned `--help[=section]`
//! output and a structured document of the parsed values.
//!
//! Declarations are only accepted before [`ProgramOptions::seal`] is called,
//! and values can only be read afterwards.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use clap::{Arg, ArgAction, Command};
use serde::Serialize;

/// Reserved option id used for the sectioned help switch.
const HELP_OPTION: &str = "help";

/// Options errors.
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    /// A declaration arrived after the options were sealed.
    #[error("options are sealed; cannot declare '--{0}'")]
    Sealed(String),

    /// A value was read before the options were sealed.
    #[error("options are not sealed yet; cannot read '{0}'")]
    NotSealed(String),

    /// An option was declared into a section that does not exist.
    #[error("unknown options section '{0}'")]
    UnknownSection(String),

    /// Two declarations used the same qualified option name.
    #[error("duplicate option '--{0}'")]
    DuplicateOption(String),

    /// A value was requested for an option nobody declared.
    #[error("unknown option '{0}'")]
    UnknownOption(String),

    /// A value was read with the wrong accessor.
    #[error("option '{name}' is not a {expected}")]
    TypeMismatch {
        /// Qualified option name.
        name: String,
        /// The kind the accessor expected.
        expected: &'static str,
    },

    /// Command line parsing failed.
    #[error("{0}")]
    Parse(String),

    /// The options document could not be serialized.
    #[error("failed to serialize options document: {0}")]
    Document(#[from] serde_json::Error),
}

/// A group of related options, rendered as one help block.
#[derive(Debug, Clone)]
pub struct Section {
    name: String,
    title: String,
    hidden: bool,
}

impl Section {
    /// Create a visible section. The empty name denotes the global section.
    #[must_use]
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            hidden: false,
        }
    }

    /// Create a section that is omitted from `--help=*` output unless it is
    /// requested by name.
    #[must_use]
    pub fn hidden(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            hidden: true,
        }
    }

    /// The section name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The human-readable section title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }
}

/// A parsed (or default) option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// A boolean switch.
    Flag(bool),
    /// A free-form string value.
    Text(String),
    /// A signed integer value.
    Integer(i64),
}

#[derive(Debug)]
struct OptionDecl {
    qualified: String,
    section: String,
    description: String,
    hidden: bool,
    default: OptionValue,
}

/// Outcome of parsing the command line.
#[derive(Debug)]
pub enum ParseOutcome {
    /// Parsing succeeded; startup continues.
    Proceed,
    /// The user asked for help; the rendered text should be printed and the
    /// process should exit successfully.
    Help(String),
}

/// The aggregated option set of the whole process.
///
/// Owned by the orchestrator; features receive it during their option
/// phases.
#[derive(Debug)]
pub struct ProgramOptions {
    program_name: String,
    description: String,
    sections: BTreeMap<String, Section>,
    declarations: BTreeMap<String, OptionDecl>,
    values: BTreeMap<String, OptionValue>,
    sealed: bool,
}

impl ProgramOptions {
    /// Create an empty option set for the named program.
    #[must_use]
    pub fn new(program_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            program_name: program_name.into(),
            description: description.into(),
            sections: BTreeMap::new(),
            declarations: BTreeMap::new(),
            values: BTreeMap::new(),
            sealed: false,
        }
    }

    /// The program name used in usage lines.
    #[must_use]
    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    /// Whether the option set has been sealed.
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Declare a section. Re-adding an existing section keeps the first
    /// registration, so unrelated features may share one.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError::Sealed`] after [`Self::seal`] was called.
    pub fn add_section(&mut self, section: Section) -> Result<(), OptionsError> {
        if self.sealed {
            return Err(OptionsError::Sealed(section.name));
        }
        self.sections.entry(section.name.clone()).or_insert(section);
        Ok(())
    }

    /// Declare an option in the given section.
    ///
    /// The qualified name is `section.name`, or just `name` for the global
    /// (empty) section.
    ///
    /// # Errors
    ///
    /// Fails when the options are sealed, the section is unknown, or the
    /// qualified name is already taken.
    pub fn add_option(
        &mut self,
        section: &str,
        name: &str,
        description: &str,
        default: OptionValue,
    ) -> Result<(), OptionsError> {
        self.declare(section, name, description, default, false)
    }

    /// Declare an option that is omitted from help output.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::add_option`].
    pub fn add_hidden_option(
        &mut self,
        section: &str,
        name: &str,
        description: &str,
        default: OptionValue,
    ) -> Result<(), OptionsError> {
        self.declare(section, name, description, default, true)
    }

    fn declare(
        &mut self,
        section: &str,
        name: &str,
        description: &str,
        default: OptionValue,
        hidden: bool,
    ) -> Result<(), OptionsError> {
        let qualified = if section.is_empty() {
            name.to_string()
        } else {
            format!("{section}.{name}")
        };
        if self.sealed {
            return Err(OptionsError::Sealed(qualified));
        }
        if !self.sections.contains_key(section) {
            return Err(OptionsError::UnknownSection(section.to_string()));
        }
        if qualified == HELP_OPTION || self.declarations.contains_key(&qualified) {
            return Err(OptionsError::DuplicateOption(qualified));
        }
        self.declarations.insert(
            qualified.clone(),
            OptionDecl {
                qualified,
                section: section.to_string(),
                description: description.to_string(),
                hidden,
                default,
            },
        );
        Ok(())
    }

    /// Parse the command line against the declared options.
    ///
    /// `argv` is the full argument vector including the program name. A
    /// `--help[=section]` request short-circuits with the rendered help text
    /// (`all` is an alias for `*`). On success every declared option has a
    /// value afterwards, falling back to its declared default.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError::Parse`] with the parser's diagnostic when the
    /// command line does not match the declarations.
    pub fn parse(&mut self, argv: &[String]) -> Result<ParseOutcome, OptionsError> {
        let mut command = Command::new(self.program_name.clone())
            .about(self.description.clone())
            .disable_help_flag(true)
            .disable_version_flag(true)
            .arg(
                Arg::new(HELP_OPTION)
                    .long(HELP_OPTION)
                    .value_name("SECTION")
                    .num_args(0..=1)
                    .require_equals(true)
                    .default_missing_value("*")
                    .action(ArgAction::Set)
                    .help("print help for the given section and exit"),
            );

        for decl in self.declarations.values() {
            let arg = Arg::new(decl.qualified.clone())
                .long(decl.qualified.clone())
                .help(decl.description.clone())
                .hide(decl.hidden);
            let arg = match &decl.default {
                OptionValue::Flag(_) => arg.action(ArgAction::SetTrue),
                OptionValue::Text(_) => arg.action(ArgAction::Set).value_name("VALUE"),
                OptionValue::Integer(_) => arg
                    .action(ArgAction::Set)
                    .value_name("NUMBER")
                    .value_parser(clap::value_parser!(i64)),
            };
            command = command.arg(arg);
        }

        let matches = command
            .try_get_matches_from(argv.iter())
            .map_err(|err| OptionsError::Parse(err.to_string()))?;

        if let Some(section) = matches.get_one::<String>(HELP_OPTION) {
            let section = if section == "all" { "*" } else { section.as_str() };
            return Ok(ParseOutcome::Help(self.render_help(section)));
        }

        for decl in self.declarations.values() {
            let value = match &decl.default {
                OptionValue::Flag(default) => {
                    OptionValue::Flag(matches.get_flag(&decl.qualified) || *default)
                }
                OptionValue::Text(default) => matches
                    .get_one::<String>(&decl.qualified)
                    .cloned()
                    .map_or_else(|| OptionValue::Text(default.clone()), OptionValue::Text),
                OptionValue::Integer(default) => matches
                    .get_one::<i64>(&decl.qualified)
                    .copied()
                    .map_or(OptionValue::Integer(*default), OptionValue::Integer),
            };
            self.values.insert(decl.qualified.clone(), value);
        }

        Ok(ParseOutcome::Proceed)
    }

    /// Seal the option set: no further declarations, values become readable.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    fn value(&self, name: &str) -> Result<&OptionValue, OptionsError> {
        if !self.sealed {
            return Err(OptionsError::NotSealed(name.to_string()));
        }
        self.values
            .get(name)
            .ok_or_else(|| OptionsError::UnknownOption(name.to_string()))
    }

    /// Read a flag value by qualified name.
    ///
    /// # Errors
    ///
    /// Fails when the options are not sealed, the option is unknown, or it
    /// is not a flag.
    pub fn flag(&self, name: &str) -> Result<bool, OptionsError> {
        match self.value(name)? {
            OptionValue::Flag(value) => Ok(*value),
            _ => Err(OptionsError::TypeMismatch {
                name: name.to_string(),
                expected: "flag",
            }),
        }
    }

    /// Read a string value by qualified name.
    ///
    /// # Errors
    ///
    /// Fails when the options are not sealed, the option is unknown, or it
    /// is not a string.
    pub fn text(&self, name: &str) -> Result<&str, OptionsError> {
        match self.value(name)? {
            OptionValue::Text(value) => Ok(value),
            _ => Err(OptionsError::TypeMismatch {
                name: name.to_string(),
                expected: "string",
            }),
        }
    }

    /// Read an integer value by qualified name.
    ///
    /// # Errors
    ///
    /// Fails when the options are not sealed, the option is unknown, or it
    /// is not an integer.
    pub fn integer(&self, name: &str) -> Result<i64, OptionsError> {
        match self.value(name)? {
            OptionValue::Integer(value) => Ok(*value),
            _ => Err(OptionsError::TypeMismatch {
                name: name.to_string(),
                expected: "integer",
            }),
        }
    }

    /// Render the parsed values as a structured document, omitting the given
    /// qualified option names.
    ///
    /// The result is deterministic for identical inputs.
    ///
    /// # Errors
    ///
    /// Fails when the options are not sealed yet.
    pub fn to_document(&self, excludes: &[&str]) -> Result<serde_json::Value, OptionsError> {
        if !self.sealed {
            return Err(OptionsError::NotSealed("<document>".to_string()));
        }
        let mut document = serde_json::Map::new();
        for (name, value) in &self.values {
            if excludes.contains(&name.as_str()) {
                continue;
            }
            document.insert(name.clone(), serde_json::to_value(value)?);
        }
        Ok(serde_json::Value::Object(document))
    }

    /// Render help text for the given section pattern (`*` selects every
    /// visible section).
    #[must_use]
    pub fn render_help(&self, pattern: &str) -> String {
        let mut out = format!("usage: {} [<options>]\n", self.program_name);
        if !self.description.is_empty() {
            let _ = writeln!(out, "\n{}", self.description);
        }

        let mut matched = false;
        for (name, section) in &self.sections {
            let selected = if pattern == "*" {
                !section.hidden
            } else {
                name == pattern
            };
            if !selected {
                continue;
            }
            matched = true;

            let explicit = pattern != "*";
            let mut lines: Vec<(String, String)> = Vec::new();
            if name.is_empty() {
                lines.push((
                    "--help[=<section>]".to_string(),
                    "print help for the given section and exit".to_string(),
                ));
            }
            for decl in self.declarations.values() {
                if decl.section != *name || (decl.hidden && !explicit) {
                    continue;
                }
                lines.push((Self::render_switch(decl), Self::render_description(decl)));
            }
            if lines.is_empty() {
                continue;
            }

            let width = lines.iter().map(|(switch, _)| switch.len()).max().unwrap_or(0);
            let _ = writeln!(out, "\n{}", section.title);
            for (switch, description) in lines {
                let _ = writeln!(out, "  {switch:width$}  {description}");
            }
        }

        if !matched {
            let _ = writeln!(out, "\nno help available for section '{pattern}'");
        }
        out
    }

    fn render_switch(decl: &OptionDecl) -> String {
        match &decl.default {
            OptionValue::Flag(_) => format!("--{}", decl.qualified),
            OptionValue::Text(_) => format!("--{} <value>", decl.qualified),
            OptionValue::Integer(_) => format!("--{} <number>", decl.qualified),
        }
    }

    fn render_description(decl: &OptionDecl) -> String {
        match &decl.default {
            OptionValue::Flag(_) => decl.description.clone(),
            OptionValue::Text(default) => {
                format!("{} (default: \"{default}\")", decl.description)
            }
            OptionValue::Integer(default) => {
                format!("{} (default: {default})", decl.description)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("test")
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect()
    }

    fn sample_options() -> ProgramOptions {
        let mut options = ProgramOptions::new("test", "test program");
        options
            .add_section(Section::new("", "Global configuration"))
            .unwrap();
        options
            .add_section(Section::new("log", "Log configuration"))
            .unwrap();
        options
            .add_hidden_option(
                "",
                "dump-dependencies",
                "dump the dependency graph",
                OptionValue::Flag(false),
            )
            .unwrap();
        options
            .add_option("log", "level", "log level to apply", OptionValue::Text("info".into()))
            .unwrap();
        options
            .add_option("log", "buffer", "line buffer size", OptionValue::Integer(512))
            .unwrap();
        options
    }

    #[test]
    fn test_parse_defaults_and_overrides() {
        let mut options = sample_options();
        let outcome = options
            .parse(&argv(&["--log.level", "debug"]))
            .unwrap();
        assert!(matches!(outcome, ParseOutcome::Proceed));
        options.seal();

        assert_eq!(options.text("log.level").unwrap(), "debug");
        assert_eq!(options.integer("log.buffer").unwrap(), 512);
        assert!(!options.flag("dump-dependencies").unwrap());
    }

    #[test]
    fn test_parse_flag_and_equals_syntax() {
        let mut options = sample_options();
        options
            .parse(&argv(&["--dump-dependencies", "--log.buffer=1024"]))
            .unwrap();
        options.seal();

        assert!(options.flag("dump-dependencies").unwrap());
        assert_eq!(options.integer("log.buffer").unwrap(), 1024);
    }

    #[test]
    fn test_parse_rejects_unknown_option() {
        let mut options = sample_options();
        let err = options.parse(&argv(&["--no-such-option"])).unwrap_err();
        assert!(matches!(err, OptionsError::Parse(_)));
    }

    #[test]
    fn test_declarations_rejected_after_seal() {
        let mut options = sample_options();
        options.parse(&argv(&[])).unwrap();
        options.seal();

        let err = options
            .add_option("log", "late", "too late", OptionValue::Flag(false))
            .unwrap_err();
        assert_eq!(err.to_string(), "options are sealed; cannot declare '--log.late'");

        let err = options
            .add_section(Section::new("late", "Late section"))
            .unwrap_err();
        assert!(matches!(err, OptionsError::Sealed(_)));
    }

    #[test]
    fn test_reads_rejected_before_seal() {
        let mut options = sample_options();
        options.parse(&argv(&[])).unwrap();

        let err = options.text("log.level").unwrap_err();
        assert!(matches!(err, OptionsError::NotSealed(_)));
    }

    #[test]
    fn test_duplicate_and_unknown_section() {
        let mut options = sample_options();
        let err = options
            .add_option("log", "level", "again", OptionValue::Text(String::new()))
            .unwrap_err();
        assert_eq!(err.to_string(), "duplicate option '--log.level'");

        let err = options
            .add_option("nope", "x", "missing section", OptionValue::Flag(false))
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown options section 'nope'");
    }

    #[test]
    fn test_type_mismatch() {
        let mut options = sample_options();
        options.parse(&argv(&[])).unwrap();
        options.seal();

        let err = options.flag("log.level").unwrap_err();
        assert_eq!(err.to_string(), "option 'log.level' is not a flag");
        let err = options.integer("log.level").unwrap_err();
        assert_eq!(err.to_string(), "option 'log.level' is not a integer");
    }

    #[test]
    fn test_help_outcome_and_sections() {
        let mut options = sample_options();
        let outcome = options.parse(&argv(&["--help"])).unwrap();
        let ParseOutcome::Help(text) = outcome else {
            panic!("expected help outcome");
        };
        assert!(text.starts_with("usage: test [<options>]"));
        assert!(text.contains("Log configuration"));
        assert!(text.contains("--log.level <value>"));
        // hidden options are not part of the overview
        assert!(!text.contains("dump-dependencies"));

        // "all" is an alias for "*"
        let mut options = sample_options();
        let ParseOutcome::Help(all_text) = options.parse(&argv(&["--help=all"])).unwrap() else {
            panic!("expected help outcome");
        };
        assert_eq!(all_text, text);
    }

    #[test]
    fn test_help_for_named_section_shows_hidden_options() {
        let options = sample_options();
        let text = options.render_help("log");
        assert!(text.contains("--log.level"));
        assert!(!text.contains("Global configuration"));

        let text = options.render_help("");
        assert!(text.contains("--dump-dependencies"));

        let text = options.render_help("bogus");
        assert!(text.contains("no help available for section 'bogus'"));
    }

    #[test]
    fn test_document_is_deterministic_and_respects_excludes() {
        let mut options = sample_options();
        options.parse(&argv(&["--log.level", "warn"])).unwrap();
        options.seal();

        let first = options.to_document(&["dump-dependencies"]).unwrap();
        let second = options.to_document(&["dump-dependencies"]).unwrap();
        assert_eq!(first, second);

        assert_eq!(first["log.level"], serde_json::json!("warn"));
        assert_eq!(first["log.buffer"], serde_json::json!(512));
        assert!(first.get("dump-dependencies").is_none());
    }

    #[test]
    fn test_document_requires_seal() {
        let mut options = sample_options();
        options.parse(&argv(&[])).unwrap();
        assert!(options.to_document(&[]).is_err());
    }
}
