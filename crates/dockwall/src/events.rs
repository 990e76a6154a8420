//! Runtime lifecycle events the controller reacts to.

use bollard::models::{EventMessage, EventMessageTypeEnum};

/// Lifecycle events relevant to firewall state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// Container started.
    ContainerStart {
        /// Container id.
        id: String,
    },
    /// Container stopped.
    ContainerStop {
        /// Container id.
        id: String,
    },
    /// Network created.
    NetworkCreate {
        /// Network id.
        id: String,
    },
    /// Network removed.
    NetworkDestroy {
        /// Network id.
        id: String,
    },
    /// Container attached to a network.
    NetworkConnect {
        /// Network id.
        network: String,
        /// Container id.
        container: String,
    },
    /// Container detached from a network.
    NetworkDisconnect {
        /// Network id.
        network: String,
        /// Container id.
        container: String,
    },
}

impl RuntimeEvent {
    /// Decode a runtime event message. Irrelevant events yield `None`.
    #[must_use]
    pub fn from_message(message: EventMessage) -> Option<Self> {
        let actor = message.actor?;
        let id = actor.id.filter(|id| !id.is_empty())?;
        let related_container = || {
            actor
                .attributes
                .as_ref()
                .and_then(|attributes| attributes.get("container"))
                .cloned()
        };

        match (message.typ?, message.action?.as_str()) {
            (EventMessageTypeEnum::CONTAINER, "start") => Some(Self::ContainerStart { id }),
            (EventMessageTypeEnum::CONTAINER, "stop") => Some(Self::ContainerStop { id }),
            (EventMessageTypeEnum::NETWORK, "create") => Some(Self::NetworkCreate { id }),
            (EventMessageTypeEnum::NETWORK, "destroy") => Some(Self::NetworkDestroy { id }),
            (EventMessageTypeEnum::NETWORK, "connect") => Some(Self::NetworkConnect {
                network: id,
                container: related_container()?,
            }),
            (EventMessageTypeEnum::NETWORK, "disconnect") => Some(Self::NetworkDisconnect {
                network: id,
                container: related_container()?,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bollard::models::EventActor;

    use super::*;

    fn message(typ: EventMessageTypeEnum, action: &str, attributes: &[(&str, &str)]) -> EventMessage {
        EventMessage {
            typ: Some(typ),
            action: Some(action.to_string()),
            actor: Some(EventActor {
                id: Some("abc".to_string()),
                attributes: Some(
                    attributes
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect::<HashMap<_, _>>(),
                ),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn decodes_container_events() {
        assert_eq!(
            RuntimeEvent::from_message(message(EventMessageTypeEnum::CONTAINER, "start", &[])),
            Some(RuntimeEvent::ContainerStart { id: "abc".into() })
        );
        assert_eq!(
            RuntimeEvent::from_message(message(EventMessageTypeEnum::CONTAINER, "stop", &[])),
            Some(RuntimeEvent::ContainerStop { id: "abc".into() })
        );
    }

    #[test]
    fn decodes_network_events() {
        assert_eq!(
            RuntimeEvent::from_message(message(
                EventMessageTypeEnum::NETWORK,
                "connect",
                &[("container", "c1"), ("name", "net1")]
            )),
            Some(RuntimeEvent::NetworkConnect {
                network: "abc".into(),
                container: "c1".into()
            })
        );
        assert_eq!(
            RuntimeEvent::from_message(message(EventMessageTypeEnum::NETWORK, "destroy", &[])),
            Some(RuntimeEvent::NetworkDestroy { id: "abc".into() })
        );
    }

    #[test]
    fn ignores_irrelevant_events() {
        assert_eq!(
            RuntimeEvent::from_message(message(EventMessageTypeEnum::CONTAINER, "die", &[])),
            None
        );
        assert_eq!(
            RuntimeEvent::from_message(message(EventMessageTypeEnum::IMAGE, "pull", &[])),
            None
        );
        // Connect without the related container cannot be handled.
        assert_eq!(
            RuntimeEvent::from_message(message(EventMessageTypeEnum::NETWORK, "connect", &[])),
            None
        );
        assert_eq!(RuntimeEvent::from_message(EventMessage::default()), None);
    }
}
