//! Network identity and buffer placement
//!
//! A few generation defaults depend on which well-known network is being
//! compiled. The identity is either given by name or guessed from the layer
//! count and input size.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ast::Network;
use crate::error::CompileError;

/// Known network families
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkProfile {
    Lenet,
    Vgg,
    VggScalehls,
    Alexnet,
    Named(String),
    Unknown,
}

impl NetworkProfile {
    /// Use the given name, otherwise guess from the network's size
    pub fn identify(name: Option<&str>, network: &Network) -> Self {
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            return Self::from_name(name);
        }

        let layers = network.len();
        let input_x = network.input().map(|v| v.x).unwrap_or(0);
        if layers < 10 {
            NetworkProfile::Lenet
        } else if input_x == 32 && layers > 14 {
            NetworkProfile::VggScalehls
        } else if input_x == 32 && layers == 13 {
            NetworkProfile::Alexnet
        } else if layers > 14 {
            NetworkProfile::Vgg
        } else {
            NetworkProfile::Unknown
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "lenet" => NetworkProfile::Lenet,
            "vgg" => NetworkProfile::Vgg,
            "vgg-scalehls" => NetworkProfile::VggScalehls,
            "alexnet" => NetworkProfile::Alexnet,
            other => NetworkProfile::Named(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            NetworkProfile::Lenet => "lenet",
            NetworkProfile::Vgg => "vgg",
            NetworkProfile::VggScalehls => "vgg-scalehls",
            NetworkProfile::Alexnet => "alexnet",
            NetworkProfile::Named(name) => name,
            NetworkProfile::Unknown => "",
        }
    }
}

impl fmt::Display for NetworkProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkProfile::Unknown => write!(f, "unknown"),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Where an intermediate layer buffer lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    /// Declared inside `forward`
    Local,
    /// Passed in through the `forward` signature
    Port,
}

impl FromStr for Placement {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Placement::Local),
            "port" | "ports" => Ok(Placement::Port),
            other => Err(CompileError::config(format!(
                "unknown layer data location '{}', expected local or port",
                other
            ))),
        }
    }
}

/// Decides each intermediate buffer's placement
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementPolicy {
    pub profile: NetworkProfile,
    pub forced: Option<Placement>,
}

impl PlacementPolicy {
    pub fn new(profile: NetworkProfile, forced: Option<Placement>) -> Self {
        Self { profile, forced }
    }

    /// Placement of the buffer holding layer `number`'s output (1-based)
    pub fn location(&self, _number: usize) -> Placement {
        if let Some(forced) = self.forced {
            return forced;
        }
        match self.profile {
            NetworkProfile::Vgg => Placement::Port,
            _ => Placement::Local,
        }
    }
}
