// ── CLI dialects ──
//
// Command templates and error patterns for each supported switch OS.
// A dialect is plain data; `CliDriver` owns the sequencing.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, DeviceErrorClass};
use crate::template::CommandTemplate;

/// PowerConnect ports are configured either as access or general ports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum SwitchportMode {
    #[default]
    Access,
    General,
}

/// Which built-in dialect a CLI switch speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialectKind {
    DellOs9,
    DellPowerConnect(SwitchportMode),
    DellFnIoa,
}

impl DialectKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::DellOs9 => "dell_os9",
            Self::DellPowerConnect(_) => "dell_powerconnect",
            Self::DellFnIoa => "dell_fn_ioa",
        }
    }
}

/// Templates and error patterns for one switch OS.
#[derive(Debug, Clone)]
pub struct CliDialect {
    pub kind: DialectKind,
    pub enter_config: Vec<String>,
    pub exit_config: Vec<String>,
    pub add_network: CommandTemplate,
    pub delete_network: CommandTemplate,
    pub plug_port: CommandTemplate,
    pub delete_port: CommandTemplate,
    pub add_to_trunk: Option<CommandTemplate>,
    pub remove_from_trunk: Option<CommandTemplate>,
    /// Read-only query for the port's untagged VLAN. Dialects without one
    /// apply plug commands directly.
    pub query_port: Option<CommandTemplate>,
    /// Single batch that moves a port off a wrong VLAN and onto the target.
    pub delete_and_plug: Option<CommandTemplate>,
    pub show_port: CommandTemplate,
    /// Extracts the untagged VLAN from query output.
    pub vlan_pattern: Option<Regex>,
    pub error_patterns: Vec<(Regex, DeviceErrorClass)>,
}

fn pattern(re: &str) -> Result<Regex, CoreError> {
    Regex::new(re).map_err(|e| CoreError::Config {
        message: format!("invalid dialect pattern {re:?}: {e}"),
    })
}

fn common_errors() -> Result<Vec<(Regex, DeviceErrorClass)>, CoreError> {
    Ok(vec![(
        pattern(r"(?i)system is busy|resource temporarily unavailable")?,
        DeviceErrorClass::Transient,
    )])
}

impl CliDialect {
    pub fn new(kind: DialectKind) -> Result<Self, CoreError> {
        match kind {
            DialectKind::DellOs9 => Self::dell_os9(),
            DialectKind::DellPowerConnect(mode) => Self::dell_powerconnect(mode),
            DialectKind::DellFnIoa => Self::dell_fn_ioa(),
        }
    }

    fn dell_os9() -> Result<Self, CoreError> {
        let mut error_patterns = vec![(
            pattern(r"Port is untagged in another Vlan")?,
            DeviceErrorClass::InvalidVlanState,
        )];
        error_patterns.extend(common_errors()?);

        Ok(Self {
            kind: DialectKind::DellOs9,
            enter_config: vec!["configure terminal".into()],
            exit_config: vec!["end".into()],
            add_network: CommandTemplate::new(
                "add_network",
                ["interface vlan {segmentation_id}", "name {network_name}", "exit"],
            ),
            delete_network: CommandTemplate::new(
                "delete_network",
                ["no interface vlan {segmentation_id}"],
            ),
            plug_port: CommandTemplate::new(
                "plug_port",
                ["interface vlan {segmentation_id}", "untagged {port}", "exit"],
            ),
            delete_port: CommandTemplate::new(
                "delete_port",
                ["interface vlan {segmentation_id}", "no untagged {port}", "exit"],
            ),
            add_to_trunk: Some(CommandTemplate::new(
                "add_network_to_trunk",
                ["interface vlan {segmentation_id}", "tagged {port}", "exit"],
            )),
            remove_from_trunk: Some(CommandTemplate::new(
                "remove_network_from_trunk",
                ["interface vlan {segmentation_id}", "no tagged {port}", "exit"],
            )),
            query_port: Some(CommandTemplate::new(
                "query_port",
                ["show interfaces switchport {port} | grep ^U"],
            )),
            delete_and_plug: Some(CommandTemplate::new(
                "delete_and_plug_port",
                [
                    "interface vlan {wrong_segmentation_id}",
                    "no untagged {port}",
                    "interface vlan {segmentation_id}",
                    "untagged {port}",
                    "exit",
                ],
            )),
            show_port: CommandTemplate::new("show_port", ["show interfaces switchport {port}"]),
            vlan_pattern: Some(pattern(r"U\s*(\d+)")?),
            error_patterns,
        })
    }

    fn dell_powerconnect(mode: SwitchportMode) -> Result<Self, CoreError> {
        let mut error_patterns = vec![
            (pattern(r"% Incomplete command")?, DeviceErrorClass::InvalidVlanState),
            (
                pattern(r"VLAN was not created by user")?,
                DeviceErrorClass::InvalidVlanState,
            ),
            (
                pattern(r"Configuration Database locked by another application - try later")?,
                DeviceErrorClass::LockedConfigDb,
            ),
        ];
        error_patterns.extend(common_errors()?);

        let (plug_port, delete_port) = match mode {
            SwitchportMode::Access => (
                CommandTemplate::new(
                    "plug_port",
                    ["interface {port}", "switchport access vlan {segmentation_id}", "exit"],
                ),
                CommandTemplate::new(
                    "delete_port",
                    ["interface {port}", "switchport access vlan none", "exit"],
                ),
            ),
            SwitchportMode::General => (
                CommandTemplate::new(
                    "plug_port",
                    [
                        "interface {port}",
                        "switchport general allowed vlan add {segmentation_id} untagged",
                        "switchport general pvid {segmentation_id}",
                        "exit",
                    ],
                ),
                CommandTemplate::new(
                    "delete_port",
                    [
                        "interface {port}",
                        "switchport general allowed vlan remove {segmentation_id}",
                        "no switchport general pvid",
                        "exit",
                    ],
                ),
            ),
        };

        Ok(Self {
            kind: DialectKind::DellPowerConnect(mode),
            enter_config: vec!["configure".into()],
            exit_config: vec!["end".into()],
            add_network: CommandTemplate::new(
                "add_network",
                ["vlan database", "vlan {segmentation_id}", "exit"],
            ),
            delete_network: CommandTemplate::new(
                "delete_network",
                ["vlan database", "no vlan {segmentation_id}", "exit"],
            ),
            plug_port,
            delete_port,
            add_to_trunk: Some(CommandTemplate::new(
                "add_network_to_trunk",
                [
                    "interface {port}",
                    "switchport general allowed vlan add {segmentation_id} tagged",
                    "exit",
                ],
            )),
            remove_from_trunk: Some(CommandTemplate::new(
                "remove_network_from_trunk",
                [
                    "interface {port}",
                    "switchport general allowed vlan remove {segmentation_id}",
                    "exit",
                ],
            )),
            query_port: None,
            delete_and_plug: None,
            show_port: CommandTemplate::new("show_port", ["show interfaces switchport {port}"]),
            vlan_pattern: None,
            error_patterns,
        })
    }

    fn dell_fn_ioa() -> Result<Self, CoreError> {
        Ok(Self {
            kind: DialectKind::DellFnIoa,
            enter_config: vec!["configure terminal".into()],
            exit_config: vec!["end".into()],
            add_network: CommandTemplate::new(
                "add_network",
                ["interface vlan {segmentation_id}", "exit"],
            ),
            delete_network: CommandTemplate::new(
                "delete_network",
                ["no interface vlan {segmentation_id}"],
            ),
            plug_port: CommandTemplate::new(
                "plug_port",
                ["interface {port}", "vlan untagged {segmentation_id}", "exit"],
            ),
            delete_port: CommandTemplate::new(
                "delete_port",
                ["interface {port}", "no vlan untagged", "exit"],
            ),
            add_to_trunk: Some(CommandTemplate::new(
                "add_network_to_trunk",
                ["interface {port}", "vlan tagged {segmentation_id}", "exit"],
            )),
            remove_from_trunk: Some(CommandTemplate::new(
                "remove_network_from_trunk",
                ["interface {port}", "no vlan tagged {segmentation_id}", "exit"],
            )),
            query_port: None,
            delete_and_plug: None,
            show_port: CommandTemplate::new("show_port", ["show interfaces switchport {port}"]),
            vlan_pattern: Some(pattern(r"U\s*(\d+)")?),
            error_patterns: common_errors()?,
        })
    }

    /// First known error pattern found in `output`.
    pub fn classify(&self, output: &str) -> Option<DeviceErrorClass> {
        self.error_patterns
            .iter()
            .find(|(re, _)| re.is_match(output))
            .map(|(_, class)| *class)
    }

    /// Untagged VLAN reported in query output, if it can be read.
    pub fn parse_vlan(&self, output: &str) -> Option<u16> {
        self.vlan_pattern
            .as_ref()?
            .captures(output)?
            .get(1)?
            .as_str()
            .parse()
            .ok()
    }

    /// Surround a configuration batch with the mode enter/exit lines.
    pub fn wrap_config(&self, commands: Vec<String>) -> Vec<String> {
        let mut batch = Vec::with_capacity(commands.len() + self.enter_config.len() + self.exit_config.len());
        batch.extend(self.enter_config.iter().cloned());
        batch.extend(commands);
        batch.extend(self.exit_config.iter().cloned());
        batch
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::template::Params;

    #[test]
    fn os9_output_classification() {
        let d = CliDialect::new(DialectKind::DellOs9).unwrap();
        assert_eq!(
            d.classify("% Error: Port is untagged in another Vlan."),
            Some(DeviceErrorClass::InvalidVlanState)
        );
        assert_eq!(d.classify("leaf1(conf)#"), None);
    }

    #[test]
    fn powerconnect_locked_database_is_retryable() {
        let d = CliDialect::new(DialectKind::DellPowerConnect(SwitchportMode::Access)).unwrap();
        let class = d
            .classify("Configuration Database locked by another application - try later")
            .unwrap();
        assert_eq!(class, DeviceErrorClass::LockedConfigDb);
        assert!(class.is_retryable());
    }

    #[test]
    fn powerconnect_general_mode_uses_pvid() {
        let d = CliDialect::new(DialectKind::DellPowerConnect(SwitchportMode::General)).unwrap();
        let out = d
            .plug_port
            .render(&Params::new().with("port", "gi1/0/5").with("segmentation_id", 77))
            .unwrap();
        assert!(out.contains(&"switchport general pvid 77".to_owned()));
    }

    #[test]
    fn switchport_mode_parses_case_insensitively() {
        assert_eq!("GENERAL".parse::<SwitchportMode>().unwrap(), SwitchportMode::General);
        assert!("trunk".parse::<SwitchportMode>().is_err());
    }

    #[test]
    fn vlan_is_read_from_query_output() {
        let d = CliDialect::new(DialectKind::DellOs9).unwrap();
        assert_eq!(d.parse_vlan("U     50\n"), Some(50));
        assert_eq!(d.parse_vlan("no vlan membership"), None);
    }

    #[test]
    fn config_batches_are_wrapped() {
        let d = CliDialect::new(DialectKind::DellFnIoa).unwrap();
        let batch = d.wrap_config(vec!["interface vlan 5".into()]);
        assert_eq!(batch.first().map(String::as_str), Some("configure terminal"));
        assert_eq!(batch.last().map(String::as_str), Some("end"));
    }
}
