//! The closed set of protocol operation names.
//!
//! Wire methods outside this set are not a defect: an unknown request method
//! gets METHOD_NOT_FOUND, an unknown notification is logged and ignored.

use std::fmt;
use std::str::FromStr;

/// Every operation name this protocol revision defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Initialize,
    Ping,
    ToolsList,
    ToolsCall,
    ResourcesList,
    ResourcesRead,
    ResourcesSubscribe,
    ResourcesUnsubscribe,
    PromptsList,
    PromptsGet,
    SamplingCreateMessage,
    RootsList,
    NotificationInitialized,
    NotificationCancelled,
    NotificationProgress,
    NotificationMessage,
    NotificationToolsListChanged,
    NotificationPromptsListChanged,
    NotificationResourcesListChanged,
    NotificationResourcesUpdated,
    NotificationRootsListChanged,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Initialize => "initialize",
            Method::Ping => "ping",
            Method::ToolsList => "tools/list",
            Method::ToolsCall => "tools/call",
            Method::ResourcesList => "resources/list",
            Method::ResourcesRead => "resources/read",
            Method::ResourcesSubscribe => "resources/subscribe",
            Method::ResourcesUnsubscribe => "resources/unsubscribe",
            Method::PromptsList => "prompts/list",
            Method::PromptsGet => "prompts/get",
            Method::SamplingCreateMessage => "sampling/createMessage",
            Method::RootsList => "roots/list",
            Method::NotificationInitialized => "notifications/initialized",
            Method::NotificationCancelled => "notifications/cancelled",
            Method::NotificationProgress => "notifications/progress",
            Method::NotificationMessage => "notifications/message",
            Method::NotificationToolsListChanged => "notifications/tools/list_changed",
            Method::NotificationPromptsListChanged => "notifications/prompts/list_changed",
            Method::NotificationResourcesListChanged => "notifications/resources/list_changed",
            Method::NotificationResourcesUpdated => "notifications/resources/updated",
            Method::NotificationRootsListChanged => "notifications/roots/list_changed",
        }
    }

    /// Notification methods never carry an id and never get a reply.
    pub fn is_notification(&self) -> bool {
        self.as_str().starts_with("notifications/")
    }

    /// The only traffic the router accepts before a session reaches Ready.
    pub fn allowed_before_ready(&self) -> bool {
        matches!(
            self,
            Method::Initialize | Method::Ping | Method::NotificationInitialized
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const ALL: &[Method] = &[
            Method::Initialize,
            Method::Ping,
            Method::ToolsList,
            Method::ToolsCall,
            Method::ResourcesList,
            Method::ResourcesRead,
            Method::ResourcesSubscribe,
            Method::ResourcesUnsubscribe,
            Method::PromptsList,
            Method::PromptsGet,
            Method::SamplingCreateMessage,
            Method::RootsList,
            Method::NotificationInitialized,
            Method::NotificationCancelled,
            Method::NotificationProgress,
            Method::NotificationMessage,
            Method::NotificationToolsListChanged,
            Method::NotificationPromptsListChanged,
            Method::NotificationResourcesListChanged,
            Method::NotificationResourcesUpdated,
            Method::NotificationRootsListChanged,
        ];
        ALL.iter().find(|m| m.as_str() == s).copied().ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_names() {
        for name in [
            "initialize",
            "ping",
            "tools/call",
            "resources/subscribe",
            "sampling/createMessage",
            "notifications/resources/updated",
        ] {
            assert_eq!(name.parse::<Method>().unwrap().as_str(), name);
        }
    }

    #[test]
    fn test_unknown_method_is_open_seam() {
        assert!("tools/fly".parse::<Method>().is_err());
    }

    #[test]
    fn test_handshake_gating_set() {
        assert!(Method::Initialize.allowed_before_ready());
        assert!(Method::Ping.allowed_before_ready());
        assert!(Method::NotificationInitialized.allowed_before_ready());
        assert!(!Method::ToolsCall.allowed_before_ready());
        assert!(!Method::NotificationProgress.allowed_before_ready());
    }
}
