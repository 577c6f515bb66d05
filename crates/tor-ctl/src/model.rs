use std::fmt;

/// A single keyword/argument(s) pair inside a command or a `Config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    pub keyword: String,
    pub arguments: Vec<String>,
}

impl Setting {
    pub fn new(keyword: impl Into<String>, arguments: impl IntoIterator<Item = String>) -> Self {
        Self {
            keyword: keyword.into(),
            arguments: arguments.into_iter().collect(),
        }
    }

    pub fn single(keyword: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(keyword, [value.into()])
    }

    /// `true` for the handful of `*Port` keywords whose values are subject to
    /// the port-collision normalization rule.
    pub fn is_port_setting(&self) -> bool {
        self.keyword.ends_with("Port")
    }
}

/// An ordered, mutable sequence of [`Setting`]s with the port-collision and
/// control-port normalization rules applied on every mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    settings: Vec<Setting>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settings(&self) -> &[Setting] {
        &self.settings
    }

    /// Pushes `setting`, normalizing it against the settings already present.
    ///
    /// Port-collision rule: if `setting` is a port setting whose value
    /// matches another port setting's value already in the config, `setting`
    /// is stored with the value `Auto` instead. Control-port rule: a
    /// `ControlPort` setting with the literal value `Disable` is stored as
    /// `Auto` instead (the control port cannot be turned off this way).
    pub fn push(&mut self, mut setting: Setting) {
        if setting.keyword == "ControlPort"
            && setting.arguments.iter().any(|a| a == "Disable")
        {
            setting.arguments = vec!["Auto".to_string()];
        } else if setting.is_port_setting() {
            let collides = self.settings.iter().any(|existing| {
                existing.is_port_setting()
                    && existing.keyword != setting.keyword
                    && !existing.arguments.is_empty()
                    && existing.arguments == setting.arguments
                    && setting.arguments.iter().all(|a| a != "Auto")
            });
            if collides {
                setting.arguments = vec!["Auto".to_string()];
            }
        }
        self.settings.push(setting);
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Chained-setter builder for [`Config`], mirroring the client builders used
/// elsewhere in this workspace.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn setting(mut self, setting: Setting) -> Self {
        self.config.push(setting);
        self
    }

    pub fn keyword(self, keyword: impl Into<String>, value: impl Into<String>) -> Self {
        self.setting(Setting::single(keyword, value))
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// A control-protocol command: a verb plus keyword/argument pairs and an
/// optional `+`-style data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: String,
    pub arguments: Vec<String>,
    pub data: Option<Vec<u8>>,
}

impl Command {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            arguments: Vec::new(),
            data: None,
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.arguments.push(value.into());
        self
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    /// Renders this command to the CRLF-terminated wire form, dot-stuffing
    /// the data block if present. A command carrying a data block is sent
    /// `+`-prefixed (e.g. `+POSTDESCRIPTOR`), per the control-spec's
    /// data-command grammar; a tor daemon parses the bare verb as a
    /// one-line command and would otherwise reject the data block that
    /// follows.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if self.data.is_some() {
            out.push(b'+');
        }
        out.extend_from_slice(self.verb.as_bytes());
        for arg in &self.arguments {
            out.push(b' ');
            out.extend_from_slice(arg.as_bytes());
        }
        match &self.data {
            None => {
                out.extend_from_slice(b"\r\n");
            }
            Some(data) => {
                out.extend_from_slice(b"\r\n");
                for line in data.split(|&b| b == b'\n') {
                    let line = line.strip_suffix(b"\r").unwrap_or(line);
                    out.extend_from_slice(&tor_line::stuff_data_line(line));
                    out.extend_from_slice(b"\r\n");
                }
                out.extend_from_slice(b".\r\n");
            }
        }
        out
    }
}

/// One line of a [`ReplyGroup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub status: u16,
    pub message: String,
    pub data: Option<Vec<u8>>,
}

/// The ordered, non-empty set of lines forming a single response to a
/// command. `status` is the status of the final line, which is shared by
/// every line in the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyGroup {
    pub lines: Vec<ReplyLine>,
}

impl ReplyGroup {
    pub fn status(&self) -> u16 {
        self.lines.last().map(|l| l.status).unwrap_or(0)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status())
    }

    /// The message text of the final line, the conventional "summary" of a
    /// reply group (e.g. `OK`).
    pub fn final_message(&self) -> &str {
        self.lines
            .last()
            .map(|l| l.message.as_str())
            .unwrap_or_default()
    }
}

impl fmt::Display for ReplyGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{} {}", line.status, line.message)?;
        }
        Ok(())
    }
}

/// A `650`-status asynchronous event, unrelated to any outstanding command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub keyword: String,
    pub message: String,
    pub data: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colliding_port_settings_normalize_the_second_to_auto() {
        let mut config = Config::new();
        config.push(Setting::single("SocksPort", "9150"));
        config.push(Setting::single("HttpTunnelPort", "9150"));
        assert_eq!(config.settings()[0].arguments, vec!["9150".to_string()]);
        assert_eq!(config.settings()[1].arguments, vec!["Auto".to_string()]);
    }

    #[test]
    fn non_colliding_port_settings_are_untouched() {
        let mut config = Config::new();
        config.push(Setting::single("SocksPort", "9150"));
        config.push(Setting::single("HttpTunnelPort", "9151"));
        assert_eq!(config.settings()[0].arguments, vec!["9150".to_string()]);
        assert_eq!(config.settings()[1].arguments, vec!["9151".to_string()]);
    }

    #[test]
    fn same_keyword_repeated_does_not_collide_with_itself() {
        let mut config = Config::new();
        config.push(Setting::single("SocksPort", "9150"));
        config.push(Setting::single("SocksPort", "9150"));
        assert_eq!(config.settings()[0].arguments, vec!["9150".to_string()]);
        assert_eq!(config.settings()[1].arguments, vec!["9150".to_string()]);
    }

    #[test]
    fn control_port_disable_is_rejected_silently() {
        let mut config = Config::new();
        config.push(Setting::single("ControlPort", "Disable"));
        assert_eq!(config.settings()[0].arguments, vec!["Auto".to_string()]);
    }

    #[test]
    fn builder_applies_the_same_normalization() {
        let config = Config::builder()
            .keyword("SocksPort", "9150")
            .keyword("DNSPort", "9150")
            .build();
        assert_eq!(config.settings()[1].arguments, vec!["Auto".to_string()]);
    }

    #[test]
    fn command_to_wire_is_crlf_terminated() {
        let command = Command::new("GETINFO").arg("version");
        assert_eq!(command.to_wire(), b"GETINFO version\r\n".to_vec());
    }

    #[test]
    fn command_with_data_block_dot_stuffs_and_terminates() {
        let command = Command::new("POSTDESCRIPTOR").with_data(b".foo\nbar".to_vec());
        let wire = command.to_wire();
        assert_eq!(wire, b"+POSTDESCRIPTOR\r\n..foo\r\nbar\r\n.\r\n".to_vec());
    }

    #[test]
    fn reply_group_reports_success_only_for_2xx() {
        let group = ReplyGroup {
            lines: vec![ReplyLine {
                status: 250,
                message: "OK".to_string(),
                data: None,
            }],
        };
        assert!(group.is_success());

        let group = ReplyGroup {
            lines: vec![ReplyLine {
                status: 552,
                message: "Unrecognized option".to_string(),
                data: None,
            }],
        };
        assert!(!group.is_success());
    }
}
