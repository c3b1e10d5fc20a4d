//! Domain model types for fleetdir.
//!
//! This module defines the core types used throughout fleetdir:
//! - [`Identity`] - Which account and directory server an invocation targets
//! - [`TokenRecord`] - The cached bearer token and the user it belongs to
//! - [`DeviceQuery`] - Groups and group-qualified devices to resolve
//! - [`Device`] - A resolved device with its numeric salt id
//! - [`TokenTtl`] - Lifetime class requested for scoped tokens

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::store::Secret;

/// The account and directory server this invocation targets.
///
/// Loaded from the identity file, or completed interactively on first run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Base URL of the directory service.
    #[serde(rename = "server-url", default)]
    pub server_url: String,

    /// Account name used to authenticate.
    #[serde(rename = "user-name", default)]
    pub user_name: String,
}

impl Identity {
    /// Create a new identity.
    pub fn new(server_url: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            user_name: user_name.into(),
        }
    }

    /// Check that both fields are present.
    pub fn validate(&self) -> Result<(), InvalidIdentity> {
        if self.server_url.trim().is_empty() {
            return Err(InvalidIdentity { field: "server-url" });
        }
        if self.user_name.trim().is_empty() {
            return Err(InvalidIdentity { field: "user-name" });
        }
        Ok(())
    }
}

/// An identity with a missing field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} is missing")]
pub struct InvalidIdentity {
    pub field: &'static str,
}

/// A cached bearer token together with the user it was issued to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(rename = "user-name", default)]
    pub user_name: String,

    #[serde(default)]
    pub token: Secret,
}

impl TokenRecord {
    pub fn new(user_name: impl Into<String>, token: Secret) -> Self {
        Self {
            user_name: user_name.into(),
            token,
        }
    }

    /// Return the token if it belongs to `user_name` and is non-empty.
    pub fn token_for(&self, user_name: &str) -> Option<&Secret> {
        if self.user_name == user_name && !self.token.is_empty() {
            Some(&self.token)
        } else {
            None
        }
    }
}

/// Lifetime class for a scoped token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenTtl {
    Short,
    Medium,
    #[default]
    Long,
}

impl TokenTtl {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }
}

impl fmt::Display for TokenTtl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device named by its group, as sent to the directory query endpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceSelector {
    #[serde(rename = "groupname")]
    pub group_name: String,

    #[serde(rename = "devicename")]
    pub device_name: String,
}

impl DeviceSelector {
    pub fn new(group_name: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            device_name: device_name.into(),
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group_name, self.device_name)
    }
}

/// A device resolved by the directory service.
///
/// `salt_id` is authoritative and is what the fleet tool is targeted with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "groupname")]
    pub group_name: String,

    #[serde(rename = "devicename")]
    pub device_name: String,

    #[serde(rename = "saltId")]
    pub salt_id: u64,
}

/// Groups and devices to resolve in a single directory query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceQuery {
    groups: BTreeSet<String>,
    devices: BTreeSet<DeviceSelector>,
}

impl DeviceQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    pub fn with_device(mut self, device: DeviceSelector) -> Self {
        self.devices.insert(device);
        self
    }

    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    pub fn devices(&self) -> &BTreeSet<DeviceSelector> {
        &self.devices
    }

    /// True when the query names at least one group or device.
    pub fn has_values(&self) -> bool {
        !self.groups.is_empty() || !self.devices.is_empty()
    }
}

/// Error parsing a device query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryParseError {
    #[error("group name is required for device '{token}'")]
    MissingGroup { token: String },
}

/// Parse a whitespace separated target list.
///
/// # Format
///
/// - `group` or `group:` selects a whole group
/// - `group:device` selects one device in a group
///
/// # Examples
///
/// ```
/// use fleetdir_core::{DeviceQuery, DeviceSelector};
///
/// let query: DeviceQuery = "group1 group2:gp".parse().unwrap();
/// assert!(query.groups().contains("group1"));
/// assert!(query.devices().contains(&DeviceSelector::new("group2", "gp")));
/// ```
impl FromStr for DeviceQuery {
    type Err = QueryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut query = DeviceQuery::new();

        for token in s.split_whitespace() {
            match token.split_once(':') {
                Some(("", _)) => {
                    return Err(QueryParseError::MissingGroup {
                        token: token.to_string(),
                    });
                }
                Some((group, "")) => {
                    query.groups.insert(group.to_string());
                }
                Some((group, device)) => {
                    query.devices.insert(DeviceSelector::new(group, device));
                }
                None => {
                    query.groups.insert(token.to_string());
                }
            }
        }

        Ok(query)
    }
}
