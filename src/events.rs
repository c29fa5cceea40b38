//! Process-wide named-event channel between the scenes and the host page.
//!
//! ┌──────────────┐ publish  ┌───────────┐ deliver (in order) ┌─────────────┐
//! │ WorldScene   ├─────────►│ EventBus  ├───────────────────►│ Host Bridge │
//! │ PuzzleScene  │◄─────────┤           │◄───────────────────┤ (JS UI)     │
//! └──────────────┘  inbox   └───────────┘      emit          └─────────────┘
//!
//! Delivery is synchronous and happens inside `publish`. Nothing is queued by
//! the bus itself: a subscriber registered after a publish never sees it.
//! Scenes that must not be re-entered while they are mid-update subscribe an
//! [`Inbox`] instead of a closure and drain it on their own schedule.
use crate::landmark::LandmarkDefinition;
use crate::progress::ProgressRecord;
use crate::puzzle::PuzzleResult;
use crate::scene::SceneName;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    PauseGame,
    ResumeGame,
    ToggleMusic,
    PlayerBoost,
    LandmarkNearby,
    LandmarkLeft,
    LandmarkInteraction,
    GameStatsUpdate,
    PuzzleLaunched,
    PuzzleCompleted,
    PuzzleExit,
    PuzzleClosed,
    GameCompleted,
    CurrentSceneReady,
    GameSaved,
    GameLoaded,
    GameReset,
    GamePaused,
    GameResumed,
    MusicStarted,
    MusicPaused,
    MusicResumed,
    PlayerJumped,
    PlayerBoostStarted,
    PlayerBoostEnded,
    DialogueStarted,
    DialogueEnded,
    GameSceneShutdown,
    PlayerPositionUpdate,
    PreloadComplete,
    GameProgressCleared,
}

impl Topic {
    pub const ALL: [Topic; 31] = [
        Topic::PauseGame,
        Topic::ResumeGame,
        Topic::ToggleMusic,
        Topic::PlayerBoost,
        Topic::LandmarkNearby,
        Topic::LandmarkLeft,
        Topic::LandmarkInteraction,
        Topic::GameStatsUpdate,
        Topic::PuzzleLaunched,
        Topic::PuzzleCompleted,
        Topic::PuzzleExit,
        Topic::PuzzleClosed,
        Topic::GameCompleted,
        Topic::CurrentSceneReady,
        Topic::GameSaved,
        Topic::GameLoaded,
        Topic::GameReset,
        Topic::GamePaused,
        Topic::GameResumed,
        Topic::MusicStarted,
        Topic::MusicPaused,
        Topic::MusicResumed,
        Topic::PlayerJumped,
        Topic::PlayerBoostStarted,
        Topic::PlayerBoostEnded,
        Topic::DialogueStarted,
        Topic::DialogueEnded,
        Topic::GameSceneShutdown,
        Topic::PlayerPositionUpdate,
        Topic::PreloadComplete,
        Topic::GameProgressCleared,
    ];
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown event name {0:?}")]
pub struct UnknownTopic(pub String);

/// Parses the kebab-case wire name, e.g. `"landmark-nearby"`.
impl FromStr for Topic {
    type Err = UnknownTopic;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(name.to_string()))
            .map_err(|_| UnknownTopic(name.to_string()))
    }
}

/// Speed-up requested by the host page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Boost {
    pub speed_multiplier: f64,
    pub duration_ms: f64,
}

/// Per-frame counters for the host's stats overlay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStats {
    pub distance: u32,
    pub landmarks_visited: usize,
    pub landmarks_completed: usize,
    pub total_landmarks: usize,
    pub ready_for_quiz: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerMotion {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
}

/// Every message that travels over the bus, tagged for the JS side as
/// `{ "type": "landmark-nearby", "payload": { .. } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum GameEvent {
    PauseGame,
    ResumeGame,
    ToggleMusic,
    PlayerBoost(Boost),
    LandmarkNearby(LandmarkDefinition),
    LandmarkLeft(LandmarkDefinition),
    LandmarkInteraction(LandmarkDefinition),
    GameStatsUpdate(GameStats),
    PuzzleLaunched(LandmarkDefinition),
    PuzzleCompleted(PuzzleResult),
    PuzzleExit,
    /// `Some` when the player acknowledged a solved board, `None` on exit.
    PuzzleClosed(Option<PuzzleResult>),
    GameCompleted(ProgressRecord),
    CurrentSceneReady(SceneName),
    GameSaved(ProgressRecord),
    GameLoaded(ProgressRecord),
    GameReset,
    GamePaused,
    GameResumed,
    MusicStarted,
    MusicPaused,
    MusicResumed,
    PlayerJumped,
    PlayerBoostStarted(Boost),
    PlayerBoostEnded,
    DialogueStarted,
    DialogueEnded,
    GameSceneShutdown,
    PlayerPositionUpdate(PlayerMotion),
    #[serde(rename_all = "camelCase")]
    PreloadComplete {
        landmarks_count: usize,
    },
    GameProgressCleared,
}

impl GameEvent {
    pub fn topic(&self) -> Topic {
        use GameEvent::*;
        match self {
            PauseGame => Topic::PauseGame,
            ResumeGame => Topic::ResumeGame,
            ToggleMusic => Topic::ToggleMusic,
            PlayerBoost(_) => Topic::PlayerBoost,
            LandmarkNearby(_) => Topic::LandmarkNearby,
            LandmarkLeft(_) => Topic::LandmarkLeft,
            LandmarkInteraction(_) => Topic::LandmarkInteraction,
            GameStatsUpdate(_) => Topic::GameStatsUpdate,
            PuzzleLaunched(_) => Topic::PuzzleLaunched,
            PuzzleCompleted(_) => Topic::PuzzleCompleted,
            PuzzleExit => Topic::PuzzleExit,
            PuzzleClosed(_) => Topic::PuzzleClosed,
            GameCompleted(_) => Topic::GameCompleted,
            CurrentSceneReady(_) => Topic::CurrentSceneReady,
            GameSaved(_) => Topic::GameSaved,
            GameLoaded(_) => Topic::GameLoaded,
            GameReset => Topic::GameReset,
            GamePaused => Topic::GamePaused,
            GameResumed => Topic::GameResumed,
            MusicStarted => Topic::MusicStarted,
            MusicPaused => Topic::MusicPaused,
            MusicResumed => Topic::MusicResumed,
            PlayerJumped => Topic::PlayerJumped,
            PlayerBoostStarted(_) => Topic::PlayerBoostStarted,
            PlayerBoostEnded => Topic::PlayerBoostEnded,
            DialogueStarted => Topic::DialogueStarted,
            DialogueEnded => Topic::DialogueEnded,
            GameSceneShutdown => Topic::GameSceneShutdown,
            PlayerPositionUpdate(_) => Topic::PlayerPositionUpdate,
            PreloadComplete { .. } => Topic::PreloadComplete,
            GameProgressCleared => Topic::GameProgressCleared,
        }
    }

    /// Events the host page is allowed to inject into the game.
    pub fn is_host_command(&self) -> bool {
        matches!(
            self,
            GameEvent::PauseGame
                | GameEvent::ResumeGame
                | GameEvent::ToggleMusic
                | GameEvent::PlayerBoost(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Rc<dyn Fn(&GameEvent)>;

struct Registration {
    id: SubscriptionId,
    handler: Handler,
}

#[derive(Default)]
struct Channel {
    next_id: u64,
    topics: HashMap<Topic, Vec<Registration>>,
}

/// Cheap-to-clone handle; every clone talks to the same channel.
#[derive(Clone, Default)]
pub struct EventBus {
    channel: Rc<RefCell<Channel>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&GameEvent) + 'static,
    {
        let mut channel = self.channel.borrow_mut();
        channel.next_id += 1;
        let id = SubscriptionId(channel.next_id);
        channel.topics.entry(topic).or_default().push(Registration {
            id,
            handler: Rc::new(handler),
        });
        id
    }

    /// Returns false when `id` was not subscribed to `topic`.
    pub fn unsubscribe(&self, topic: Topic, id: SubscriptionId) -> bool {
        let mut channel = self.channel.borrow_mut();
        let Some(registrations) = channel.topics.get_mut(&topic) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|registration| registration.id != id);
        before != registrations.len()
    }

    /// Delivers to a snapshot of the current subscribers so that handlers may
    /// subscribe, unsubscribe or publish without disturbing this delivery.
    pub fn publish(&self, event: GameEvent) {
        let handlers: Vec<Handler> = {
            let channel = self.channel.borrow();
            match channel.topics.get(&event.topic()) {
                Some(registrations) => registrations
                    .iter()
                    .map(|registration| registration.handler.clone())
                    .collect(),
                None => Vec::new(),
            }
        };
        for handler in handlers {
            handler(&event);
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.channel
            .borrow()
            .topics
            .get(&topic)
            .map_or(0, Vec::len)
    }

    pub fn total_subscribers(&self) -> usize {
        self.channel.borrow().topics.values().map(Vec::len).sum()
    }
}

/// Mailbox subscriber: the bus pushes, the owning scene drains.
#[derive(Clone, Default)]
pub struct Inbox {
    queue: Rc<RefCell<VecDeque<GameEvent>>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(&self) -> impl Fn(&GameEvent) + 'static {
        let queue = self.queue.clone();
        move |event: &GameEvent| queue.borrow_mut().push_back(event.clone())
    }

    pub fn drain(&self) -> Vec<GameEvent> {
        self.queue.borrow_mut().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

/// Subscriptions owned by one scene, cancelled in reverse registration order.
#[derive(Default)]
pub struct Subscriptions {
    active: Vec<(Topic, SubscriptionId)>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&mut self, bus: &EventBus, topic: Topic, handler: F)
    where
        F: Fn(&GameEvent) + 'static,
    {
        let id = bus.subscribe(topic, handler);
        self.active.push((topic, id));
    }

    /// Routes each topic into `inbox`.
    pub fn route(&mut self, bus: &EventBus, topics: &[Topic], inbox: &Inbox) {
        for topic in topics {
            self.add(bus, *topic, inbox.sender());
        }
    }

    pub fn cancel_all(&mut self, bus: &EventBus) {
        while let Some((topic, id)) = self.active.pop() {
            if !bus.unsubscribe(topic, id) {
                log::debug!("subscription {:?} on {:?} was already gone", id, topic);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, Rc<RefCell<Vec<&'static str>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        (log.clone(), log)
    }

    #[test]
    fn delivers_in_subscription_order() {
        let bus = EventBus::new();
        let (log, seen) = recorder();
        let first = log.clone();
        bus.subscribe(Topic::PauseGame, move |_| first.borrow_mut().push("first"));
        let second = log.clone();
        bus.subscribe(Topic::PauseGame, move |_| second.borrow_mut().push("second"));

        bus.publish(GameEvent::PauseGame);

        assert_eq!(*seen.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn only_matching_topic_is_delivered() {
        let bus = EventBus::new();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        bus.subscribe(Topic::ResumeGame, move |_| counter.set(counter.get() + 1));

        bus.publish(GameEvent::PauseGame);
        bus.publish(GameEvent::ResumeGame);

        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn subscribing_after_publish_misses_the_event() {
        let bus = EventBus::new();
        bus.publish(GameEvent::GameReset);
        let inbox = Inbox::new();
        bus.subscribe(Topic::GameReset, inbox.sender());

        assert!(inbox.is_empty());
    }

    #[test]
    fn unsubscribe_inside_handler_does_not_affect_current_delivery() {
        let bus = EventBus::new();
        let hits = Rc::new(Cell::new(0));
        let second_id: Rc<Cell<Option<SubscriptionId>>> = Rc::new(Cell::new(None));

        let handle = bus.clone();
        let victim = second_id.clone();
        bus.subscribe(Topic::ToggleMusic, move |_| {
            if let Some(id) = victim.get() {
                handle.unsubscribe(Topic::ToggleMusic, id);
            }
        });
        let counter = hits.clone();
        second_id.set(Some(bus.subscribe(Topic::ToggleMusic, move |_| {
            counter.set(counter.get() + 1)
        })));

        bus.publish(GameEvent::ToggleMusic);
        assert_eq!(hits.get(), 1);

        bus.publish(GameEvent::ToggleMusic);
        assert_eq!(hits.get(), 1);
        assert_eq!(bus.subscriber_count(Topic::ToggleMusic), 1);
    }

    #[test]
    fn reentrant_publish_reaches_other_topics() {
        let bus = EventBus::new();
        let inbox = Inbox::new();
        bus.subscribe(Topic::GamePaused, inbox.sender());
        let handle = bus.clone();
        bus.subscribe(Topic::PauseGame, move |_| handle.publish(GameEvent::GamePaused));

        bus.publish(GameEvent::PauseGame);

        assert_eq!(inbox.drain(), vec![GameEvent::GamePaused]);
    }

    #[test]
    fn subscriptions_cancel_everything_they_registered() {
        let bus = EventBus::new();
        let inbox = Inbox::new();
        let mut subscriptions = Subscriptions::new();
        subscriptions.route(&bus, &[Topic::PauseGame, Topic::ResumeGame], &inbox);
        bus.subscribe(Topic::PauseGame, |_| {});
        assert_eq!(bus.total_subscribers(), 3);

        subscriptions.cancel_all(&bus);

        assert!(subscriptions.is_empty());
        assert_eq!(bus.total_subscribers(), 1);
    }

    #[test]
    fn events_use_kebab_case_wire_names() {
        let json = serde_json::to_value(GameEvent::PlayerBoost(Boost {
            speed_multiplier: 2.0,
            duration_ms: 5000.0,
        }))
        .unwrap();
        assert_eq!(json["type"], "player-boost");
        assert_eq!(json["payload"]["speedMultiplier"], 2.0);

        let pause: GameEvent = serde_json::from_str(r#"{"type":"pause-game"}"#).unwrap();
        assert_eq!(pause, GameEvent::PauseGame);
        assert!(pause.is_host_command());
        assert!(!GameEvent::GameReset.is_host_command());
    }

    // one arm per variant, so a new topic does not compile here until it
    // is also listed in `Topic::ALL`
    fn wire_name(topic: Topic) -> &'static str {
        match topic {
            Topic::PauseGame => "pause-game",
            Topic::ResumeGame => "resume-game",
            Topic::ToggleMusic => "toggle-music",
            Topic::PlayerBoost => "player-boost",
            Topic::LandmarkNearby => "landmark-nearby",
            Topic::LandmarkLeft => "landmark-left",
            Topic::LandmarkInteraction => "landmark-interaction",
            Topic::GameStatsUpdate => "game-stats-update",
            Topic::PuzzleLaunched => "puzzle-launched",
            Topic::PuzzleCompleted => "puzzle-completed",
            Topic::PuzzleExit => "puzzle-exit",
            Topic::PuzzleClosed => "puzzle-closed",
            Topic::GameCompleted => "game-completed",
            Topic::CurrentSceneReady => "current-scene-ready",
            Topic::GameSaved => "game-saved",
            Topic::GameLoaded => "game-loaded",
            Topic::GameReset => "game-reset",
            Topic::GamePaused => "game-paused",
            Topic::GameResumed => "game-resumed",
            Topic::MusicStarted => "music-started",
            Topic::MusicPaused => "music-paused",
            Topic::MusicResumed => "music-resumed",
            Topic::PlayerJumped => "player-jumped",
            Topic::PlayerBoostStarted => "player-boost-started",
            Topic::PlayerBoostEnded => "player-boost-ended",
            Topic::DialogueStarted => "dialogue-started",
            Topic::DialogueEnded => "dialogue-ended",
            Topic::GameSceneShutdown => "game-scene-shutdown",
            Topic::PlayerPositionUpdate => "player-position-update",
            Topic::PreloadComplete => "preload-complete",
            Topic::GameProgressCleared => "game-progress-cleared",
        }
    }

    #[test]
    fn all_lists_every_topic_once() {
        let names: std::collections::HashSet<_> =
            Topic::ALL.iter().map(|topic| wire_name(*topic)).collect();
        // arms in `wire_name`
        assert_eq!(names.len(), 31);
        assert_eq!(Topic::ALL.len(), 31);
        for topic in Topic::ALL {
            assert_eq!(serde_json::to_value(topic).unwrap(), wire_name(topic));
            assert_eq!(wire_name(topic).parse::<Topic>(), Ok(topic));
        }
    }

    #[test]
    fn topics_parse_from_wire_names() {
        assert_eq!("landmark-nearby".parse::<Topic>(), Ok(Topic::LandmarkNearby));
        assert_eq!("game-stats-update".parse::<Topic>(), Ok(Topic::GameStatsUpdate));
        assert_eq!(
            "landmarkNearby".parse::<Topic>(),
            Err(UnknownTopic("landmarkNearby".into()))
        );
        for topic in Topic::ALL {
            let name = serde_json::to_value(topic).unwrap();
            assert_eq!(name.as_str().unwrap().parse::<Topic>(), Ok(topic));
        }
    }
}
