//! The Watcher (§4.4): pushes `(topic, min, max)` notifications to
//! long-lived subscribers whenever a topic's max offset advances, driven by
//! real filesystem watches over each topic directory (`notify` crate,
//! grounded on the polling-watcher pattern used for dev-mode file watching
//! elsewhere in the pack).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::registry::Registry;
use crate::storage::segment::DATA_FILE_SUFFIX;

/// Requested in place of a concrete topic name to subscribe to every topic.
pub const WILDCARD_TOPIC: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchUpdate {
    pub topic: String,
    pub min: i64,
    pub max: i64,
}

/// A subscription session either emits offset updates or, per §4.4's
/// failure semantics, a per-topic error that ends only that topic's
/// coverage while the rest of the session continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Update(WatchUpdate),
    TopicError { topic: String, message: String },
}

#[derive(Debug, Clone)]
pub enum WatchCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Terminate,
}

pub struct Watcher {
    registry: Arc<Registry>,
}

impl Watcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Watcher { registry }
    }

    /// Drives one subscription session to completion. Blocks on native
    /// filesystem events, so callers must run this inside
    /// `tokio::task::spawn_blocking`.
    #[instrument(skip_all)]
    pub fn run_session(
        &self,
        initial_topics: Vec<String>,
        mut commands: mpsc::Receiver<WatchCommand>,
        events: mpsc::Sender<WatchEvent>,
    ) {
        let mut wildcard = false;
        let mut watched: HashSet<String> = HashSet::new();
        for topic in initial_topics {
            if topic == WILDCARD_TOPIC {
                wildcard = true;
            } else {
                watched.insert(topic);
            }
        }

        let (fs_tx, fs_rx) = std_mpsc::channel::<notify::Result<Event>>();
        let mut notify_watcher = match RecommendedWatcher::new(
            move |event| {
                let _ = fs_tx.send(event);
            },
            notify::Config::default().with_poll_interval(Duration::from_millis(250)),
        ) {
            Ok(watcher) => watcher,
            Err(error) => {
                warn!(%error, "failed to start filesystem watcher, ending session");
                return;
            }
        };

        let mut last_seen: HashMap<String, (i64, i64)> = HashMap::new();

        for topic in watched.clone() {
            self.arm_topic(&mut notify_watcher, &topic, &events, &mut last_seen);
        }
        if wildcard {
            self.arm_wildcard(&mut notify_watcher, &events, &mut last_seen, &mut watched);
        }

        loop {
            match commands.try_recv() {
                Ok(WatchCommand::Subscribe(topics)) => {
                    for topic in topics {
                        if topic == WILDCARD_TOPIC {
                            wildcard = true;
                            self.arm_wildcard(&mut notify_watcher, &events, &mut last_seen, &mut watched);
                        } else {
                            self.arm_topic(&mut notify_watcher, &topic, &events, &mut last_seen);
                            watched.insert(topic);
                        }
                    }
                }
                Ok(WatchCommand::Unsubscribe(topics)) => {
                    for topic in topics {
                        watched.remove(&topic);
                        last_seen.remove(&topic);
                    }
                }
                Ok(WatchCommand::Terminate) => {
                    info!("watch session terminated by client");
                    return;
                }
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    debug!("watch command channel closed, ending session");
                    return;
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
            }

            match fs_rx.recv_timeout(Duration::from_millis(250)) {
                Ok(Ok(event)) => self.handle_fs_event(event, wildcard, &watched, &events, &mut last_seen),
                Ok(Err(error)) => warn!(%error, "filesystem watch error"),
                Err(std_mpsc::RecvTimeoutError::Timeout) => {}
                Err(std_mpsc::RecvTimeoutError::Disconnected) => return,
            }

            if events.is_closed() {
                debug!("watch event receiver dropped, ending session");
                return;
            }
        }
    }

    fn arm_topic(
        &self,
        notify_watcher: &mut RecommendedWatcher,
        topic: &str,
        events: &mpsc::Sender<WatchEvent>,
        last_seen: &mut HashMap<String, (i64, i64)>,
    ) {
        match self.registry.get(topic) {
            Ok(handle) => {
                if let Err(error) = notify_watcher.watch(&handle.dir(), RecursiveMode::NonRecursive) {
                    let _ = events.blocking_send(WatchEvent::TopicError {
                        topic: topic.to_string(),
                        message: error.to_string(),
                    });
                    return;
                }
                self.emit_if_changed(topic, &handle.offsets(), events, last_seen);
            }
            Err(error) => {
                let _ = events.blocking_send(WatchEvent::TopicError {
                    topic: topic.to_string(),
                    message: error.to_string(),
                });
            }
        }
    }

    fn arm_wildcard(
        &self,
        notify_watcher: &mut RecommendedWatcher,
        events: &mpsc::Sender<WatchEvent>,
        last_seen: &mut HashMap<String, (i64, i64)>,
        watched: &mut HashSet<String>,
    ) {
        let Ok(topics) = self.registry.list(None, None, None) else {
            return;
        };
        for topic in topics {
            if watched.contains(&topic) {
                continue;
            }
            self.arm_topic(notify_watcher, &topic, events, last_seen);
            watched.insert(topic);
        }
    }

    fn handle_fs_event(
        &self,
        event: Event,
        wildcard: bool,
        watched: &HashSet<String>,
        events: &mpsc::Sender<WatchEvent>,
        last_seen: &mut HashMap<String, (i64, i64)>,
    ) {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }
        for path in &event.paths {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(DATA_FILE_SUFFIX) {
                continue;
            }
            let Some(topic) = path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()) else {
                continue;
            };
            if wildcard || watched.contains(topic) {
                if let Ok(handle) = self.registry.get(topic) {
                    self.emit_if_changed(topic, &handle.offsets(), events, last_seen);
                }
            }
        }
    }

    /// Emits an update only if max has advanced since the last emission for
    /// this topic, preserving the non-decreasing per-topic ordering
    /// guarantee (§4.4).
    fn emit_if_changed(
        &self,
        topic: &str,
        offsets: &(i64, i64),
        events: &mpsc::Sender<WatchEvent>,
        last_seen: &mut HashMap<String, (i64, i64)>,
    ) {
        let &(min, max) = offsets;
        let changed = last_seen.get(topic).is_none_or(|&(_, prev_max)| max != prev_max);
        if changed {
            last_seen.insert(topic.to_string(), (min, max));
            let _ = events.blocking_send(WatchEvent::Update(WatchUpdate {
                topic: topic.to_string(),
                min,
                max,
            }));
        }
    }
}
