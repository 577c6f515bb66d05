use crate::bus::{BusEvent, EventBus, EventKind};
use crate::error::ControlError;
use crate::parser::ParsedUnit;
use crate::queue::CommandQueue;

/// Routes parsed reply groups to the in-flight [`crate::queue::Job`] and
/// parsed events to the [`EventBus`]. A non-650 reply arriving with nothing
/// in flight means the connection and the daemon have desynced — a replay
/// from a prior command, or one too many replies — and is always fatal.
pub struct Dispatcher {
    queue: CommandQueue,
    bus: EventBus,
}

impl Dispatcher {
    pub fn new(queue: CommandQueue, bus: EventBus) -> Self {
        Self { queue, bus }
    }

    /// Returns `Err` only for desync; the caller treats that as fatal to the
    /// connection, same as a parser error.
    pub fn dispatch(&self, unit: ParsedUnit) -> Result<(), ControlError> {
        match unit {
            ParsedUnit::Event(event) => {
                self.bus.publish(EventKind::Control, BusEvent::Control(event));
                Ok(())
            }
            ParsedUnit::Reply(group) => {
                if self.queue.current().is_none() {
                    return Err(ControlError::protocol(
                        "reply received with no command in flight",
                    ));
                }
                let result = if group.is_success() {
                    Ok(group)
                } else {
                    Err(ControlError::from_status(
                        group.status(),
                        group.final_message(),
                    ))
                };
                self.queue.complete_current(result);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Command, ReplyLine};

    #[test]
    fn reply_with_no_current_command_is_desync() {
        let dispatcher = Dispatcher::new(CommandQueue::new(), EventBus::new());
        let group = crate::model::ReplyGroup {
            lines: vec![ReplyLine {
                status: 250,
                message: "OK".into(),
                data: None,
            }],
        };
        assert!(dispatcher
            .dispatch(ParsedUnit::Reply(group))
            .is_err());
    }

    #[tokio::test]
    async fn success_reply_resolves_the_current_job() {
        let queue = CommandQueue::new();
        let dispatcher = Dispatcher::new(queue.clone(), EventBus::new());
        let job = queue.enqueue(Command::new("GETINFO"));
        queue.begin_next().unwrap();
        let group = crate::model::ReplyGroup {
            lines: vec![ReplyLine {
                status: 250,
                message: "OK".into(),
                data: None,
            }],
        };
        dispatcher.dispatch(ParsedUnit::Reply(group)).unwrap();
        assert!(job.wait().await.is_ok());
    }

    #[test]
    fn event_goes_to_the_bus_not_the_queue() {
        let queue = CommandQueue::new();
        let bus = EventBus::new();
        let dispatcher = Dispatcher::new(queue, bus.clone());
        let event = crate::model::EventRecord {
            keyword: "NOTICE".into(),
            message: "hello".into(),
            data: None,
        };
        // No current command, yet dispatching an event must not be treated
        // as desync.
        assert!(dispatcher.dispatch(ParsedUnit::Event(event)).is_ok());
    }
}
