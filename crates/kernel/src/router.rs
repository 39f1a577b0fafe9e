//! Point-to-point message delivery.
//!
//! Delivery is best effort and at most once: a message whose target is not
//! registered, or has no mailbox, is dropped.

use alloc::vec::Vec;
use log::{debug, trace};

use crate::message::{Message, Target};
use crate::task::Task;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: usize,
    pub dropped: usize,
}

impl DeliveryStats {
    pub fn total(&self) -> usize {
        self.delivered + self.dropped
    }
}

impl core::ops::AddAssign for DeliveryStats {
    fn add_assign(&mut self, rhs: Self) {
        self.delivered += rhs.delivered;
        self.dropped += rhs.dropped;
    }
}

/// Finds the task a target refers to. Names resolve to the first registered
/// task carrying that name.
pub fn resolve<'a>(target: &Target, tasks: &'a [Task]) -> Option<&'a Task> {
    match target {
        Target::Handle(id) => tasks.iter().find(|task| task.id() == *id),
        Target::Name(name) => tasks.iter().find(|task| task.name() == Some(name.as_str())),
    }
}

/// Routes every message to its target's mailbox.
pub fn deliver_messages(messages: Vec<Message>, tasks: &[Task]) -> DeliveryStats {
    let mut stats = DeliveryStats::default();

    for message in messages {
        let Some(task) = resolve(message.target(), tasks) else {
            debug!("dropping {} for unknown target {}", message.kind(), message.target());
            stats.dropped += 1;
            continue;
        };

        let (kind, id) = (message.kind(), task.id());
        if task.deliver(message) {
            trace!("delivered {kind} to {id}");
            stats.delivered += 1;
        } else {
            debug!("dropping {kind} for {id}: task has no mailbox");
            stats.dropped += 1;
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use crate::task::{Priority, TaskAction, TaskConfig, TaskId};

    fn task(id: u32, name: &str) -> Task {
        let config = TaskConfig::new(TaskId(id), Priority(1)).with_name(name);
        Task::from_fn(config, |_| Ok(TaskAction::Yield))
    }

    #[test]
    fn routes_by_handle_and_name() {
        let tasks = vec![task(1, "alpha"), task(2, "beta")];
        let stats = deliver_messages(
            vec![
                Message::new(MessageType(130), TaskId(1), TaskId(2)),
                Message::new(MessageType(131), TaskId(2), "alpha"),
            ],
            &tasks,
        );

        assert_eq!(stats, DeliveryStats { delivered: 2, dropped: 0 });
        assert_eq!(tasks[0].recv()[0].kind(), MessageType(131));
        assert_eq!(tasks[1].recv()[0].kind(), MessageType(130));
    }

    #[test]
    fn unknown_targets_are_dropped() {
        let tasks = vec![task(1, "alpha")];
        let stats = deliver_messages(
            vec![
                Message::quit(TaskId(1), "task3"),
                Message::quit(TaskId(1), TaskId(99)),
            ],
            &tasks,
        );

        assert_eq!(stats, DeliveryStats { delivered: 0, dropped: 2 });
        assert_eq!(tasks[0].message_count(), 0);
    }

    #[test]
    fn name_delivers_to_first_match_only() {
        let tasks = vec![task(1, "twin"), task(2, "twin")];
        deliver_messages(vec![Message::quit(TaskId(9), "twin")], &tasks);

        assert_eq!(tasks[0].message_count(), 1);
        assert_eq!(tasks[1].message_count(), 0);
    }

    #[test]
    fn tasks_without_mailbox_drop_messages() {
        let config = TaskConfig::new(TaskId(1), Priority(1)).without_mailbox();
        let tasks = vec![Task::from_fn(config, |_| Ok(TaskAction::Yield))];

        let stats = deliver_messages(vec![Message::quit(TaskId(2), TaskId(1))], &tasks);
        assert_eq!(stats.dropped, 1);
    }
}
