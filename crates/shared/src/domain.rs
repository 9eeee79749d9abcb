use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Producer name used when a window does not declare one.
pub const DEFAULT_PRODUCER: &str = "localhost";

/// Cache partition shared by anonymous users and by portlets that are not user specific.
pub const PUBLIC_PARTITION: &str = "public";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed portlet key `{0}`: expected `portletID@producer`")]
pub struct MalformedPortletKey(pub String);

/// Composite identity of a portlet instance: `portletID@producer`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortletKey {
    portlet_id: String,
    producer: String,
}

impl PortletKey {
    pub fn new(portlet_id: impl Into<String>, producer: impl Into<String>) -> Self {
        Self {
            portlet_id: portlet_id.into(),
            producer: producer.into(),
        }
    }

    pub fn portlet_id(&self) -> &str {
        &self.portlet_id
    }

    pub fn producer(&self) -> &str {
        &self.producer
    }
}

impl fmt::Display for PortletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.portlet_id, self.producer)
    }
}

impl FromStr for PortletKey {
    type Err = MalformedPortletKey;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        // Portlet ids may not contain '@', producer names may.
        let Some((portlet_id, producer)) = raw.split_once('@') else {
            return Err(MalformedPortletKey(raw.to_string()));
        };
        if portlet_id.trim().is_empty() || producer.trim().is_empty() {
            return Err(MalformedPortletKey(raw.to_string()));
        }
        Ok(Self::new(portlet_id, producer))
    }
}

impl TryFrom<String> for PortletKey {
    type Error = MalformedPortletKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PortletKey> for String {
    fn from(value: PortletKey) -> Self {
        value.to_string()
    }
}

macro_rules! wire_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                let raw = raw.trim().to_ascii_lowercase();
                // WSRP style values (`wsrp:normal`) are accepted as well.
                let raw = raw.strip_prefix("wsrp:").unwrap_or(raw.as_str());
                match raw {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} `{other}`", stringify!($name))),
                }
            }
        }
    };
}

wire_enum!(WindowState {
    Normal => "normal",
    Minimized => "minimized",
    Maximized => "maximized",
    Solo => "solo",
});

wire_enum!(PortletMode {
    View => "view",
    Edit => "edit",
    Preview => "preview",
    Help => "help",
});

wire_enum!(FramePosition {
    Top => "top",
    Left => "left",
    Right => "right",
    Content => "content",
    Bottom => "bottom",
});

wire_enum!(PanelStyle {
    Tile => "tile",
    Tab => "tab",
    Accordion => "accordion",
    Template => "template",
});

impl Default for WindowState {
    fn default() -> Self {
        Self::Normal
    }
}

impl Default for PortletMode {
    fn default() -> Self {
        Self::View
    }
}

impl Default for PanelStyle {
    fn default() -> Self {
        Self::Tile
    }
}

/// Parses a producer-declared slash separated list such as `"normal/minimized"`.
///
/// Unknown entries are skipped; the order of the declaration is kept so the
/// first entry can serve as the default.
pub fn parse_slash_list<T: FromStr>(raw: &str) -> Vec<T> {
    raw.split('/')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| item.parse().ok())
        .collect()
}
