//! Targeting resolved devices with the fleet tool.
//!
//! Devices are addressed by minion id, built from a host-dependent prefix and
//! the device's salt id (`pi-42`, or `pi-test-42` against the test server).

use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::model::Device;

/// Directory host whose devices use the test minion prefix.
pub const DEFAULT_TEST_HOST: &str = "api-test.cacophony.org.nz";

const ID_PREFIX: &str = "pi";
const TEST_SUFFIX: &str = "-test";

/// Error type for building fleet tool arguments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// The query resolved to no devices.
    #[error("no valid devices found")]
    NoValidDevices,
}

/// Minion id prefix for devices registered with `server_url`.
pub fn target_prefix(server_url: &str, test_host: &str) -> String {
    let mut prefix = ID_PREFIX.to_string();
    match Url::parse(server_url) {
        Ok(url) if url.host_str() == Some(test_host) => prefix.push_str(TEST_SUFFIX),
        Ok(_) => {}
        Err(e) => warn!("Error parsing server URL {:?}: {}", server_url, e),
    }
    prefix
}

/// Argument list handed to the fleet tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetCommand {
    args: Vec<String>,
}

impl TargetCommand {
    /// Target `devices` with `command`.
    ///
    /// A single device is passed as a bare minion id; several are passed as a
    /// `-L` list.
    pub fn for_devices(
        server_url: &str,
        test_host: &str,
        devices: &[Device],
        command: &[String],
    ) -> Result<Self, TargetError> {
        if devices.is_empty() {
            return Err(TargetError::NoValidDevices);
        }

        let prefix = target_prefix(server_url, test_host);
        let ids: Vec<String> = devices
            .iter()
            .map(|device| format!("{}-{}", prefix, device.salt_id))
            .collect();

        let mut args = Vec::with_capacity(command.len() + 2);
        if ids.len() > 1 {
            args.push("-L".to_string());
            args.push(ids.join(","));
        } else {
            args.extend(ids);
        }
        args.extend(command.iter().cloned());

        Ok(Self { args })
    }

    /// Hand arguments to the tool unchanged.
    pub fn passthrough(args: impl IntoIterator<Item = String>) -> Self {
        Self {
            args: args.into_iter().collect(),
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(salt_id: u64) -> Device {
        Device {
            group_name: "group1".to_string(),
            device_name: format!("dev{}", salt_id),
            salt_id,
        }
    }

    fn command() -> Vec<String> {
        vec!["test.ping".to_string()]
    }

    #[test]
    fn test_prefix_for_test_host() {
        assert_eq!(
            target_prefix("https://api-test.cacophony.org.nz", DEFAULT_TEST_HOST),
            "pi-test"
        );
        assert_eq!(target_prefix("https://api.example.org", DEFAULT_TEST_HOST), "pi");
        assert_eq!(target_prefix("not a url", DEFAULT_TEST_HOST), "pi");
    }

    #[test]
    fn test_single_device() {
        let cmd = TargetCommand::for_devices(
            "https://api.example.org",
            DEFAULT_TEST_HOST,
            &[device(7)],
            &command(),
        )
        .unwrap();

        assert_eq!(cmd.args(), ["pi-7", "test.ping"]);
    }

    #[test]
    fn test_multiple_devices_keep_order() {
        let cmd = TargetCommand::for_devices(
            "https://api-test.cacophony.org.nz",
            DEFAULT_TEST_HOST,
            &[device(42), device(7)],
            &command(),
        )
        .unwrap();

        assert_eq!(cmd.args(), ["-L", "pi-test-42,pi-test-7", "test.ping"]);
    }

    #[test]
    fn test_no_devices() {
        let result =
            TargetCommand::for_devices("https://api.example.org", DEFAULT_TEST_HOST, &[], &command());
        assert_eq!(result, Err(TargetError::NoValidDevices));
    }

    #[test]
    fn test_passthrough() {
        let cmd = TargetCommand::passthrough(vec!["*".to_string(), "test.ping".to_string()]);
        assert_eq!(cmd.args(), ["*", "test.ping"]);
    }
}
