use crate::browser;
use crate::config::{GameConfig, WorldConfig};
use crate::dialogue::{
    Dialogue, DialogueAction, DialogueButton, DialogueHost, DialogueScript, DialogueStep,
};
use crate::engine::input::InputState;
use crate::engine::{
    css_color, BrowserAssets, Game, InstanceId, PendingTexture, Point, Rect, Renderer,
    TextureStatus, WallClock,
};
use crate::events::{Boost, EventBus, GameEvent, GameStats, Inbox, PlayerMotion, Subscriptions, Topic};
use crate::landmark::{LandmarkDefinition, LandmarkId, LandmarkSet, ProximityTracker};
use crate::player::state::Physics;
use crate::player::{Direction, Player};
use crate::progress::{Position, ProgressRecord, ProgressStore};
use crate::puzzle::PuzzleResult;
use crate::scene::{SceneCommand, SceneData, SceneName, SceneRegistry, Services, CANVAS};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::join;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// TABLE
/// ┌───────────────────── Game Architecture Overview ────────────────────────┐
/// │                                                                         │
/// │                              Update Flow                                │
/// │                                                                         │
/// │    ┌─────────────┐          ┌─────────────┐          ┌─────────────┐    │
/// │    │  engine.rs  │  update  │  scene.rs   │  update  │   game.rs   │    │
/// │    │  GameLoop   ├─────────►│  Registry   ├─────────►│  WorldScene │    │
/// │    │  update()   │          │  tick()     │          │  update()   │    │
/// │    └─────────────┘          └──────┬──────┘          └──────┬──────┘    │
/// │                                    │                        │           │
/// │                              ┌─────┴──────┐            ┌────┴─────┐     │
/// │                              │  settle()  │  inbox     │ EventBus │     │
/// │                              │  drain     ◄────────────┤ publish  │     │
/// │                              │  mailboxes │            │          │     │
/// │                              └────────────┘            └──────────┘     │
/// │                                                                         │
/// ├──────────────────────── Call Sequence ──────────────────────────────────┤
/// │                                                                         │
/// │  1. Input        left/right (level), jump (edge, grounded only)         │
/// │  2. Physics      Player::update()                                       │
/// │  3. Proximity    landmark-nearby / landmark-left on change only         │
/// │  4. Distance     totalDistance high-water mark                          │
/// │  5. Stats        game-stats-update, player-position-update              │
/// │  6. Commands     interact, save, reset, minimap, pause, back to map     │
/// │  7. Save         autosave and manual save collapse into one write       │
/// │                                                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
pub enum HanoiExplorer {
    /// Config and landmarks are still being fetched.
    Loading(Boot),

    /// Scenes are running.
    Loaded(SceneRegistry),
}

/// Filled with the configured store once the config is known, so the host
/// can clear the save the running game actually uses.
pub type ProgressSlot = Rc<RefCell<Option<ProgressStore>>>;

/// What the host hands over before anything is fetched.
#[derive(Clone)]
pub struct Boot {
    pub bus: EventBus,
    pub assets: BrowserAssets,
    pub progress: ProgressSlot,
}

impl HanoiExplorer {
    const LANDMARKS_PATH: &'static str = "landmarks.json";

    pub fn new(bus: EventBus, assets: BrowserAssets, progress: ProgressSlot) -> Self {
        HanoiExplorer::Loading(Boot {
            bus,
            assets,
            progress,
        })
    }

    async fn load_config() -> Result<GameConfig> {
        browser::fetch_json::<GameConfig>(GameConfig::PATH)
            .await
            .with_context(|| format!("Failed to load config from : {}", GameConfig::PATH))
    }

    async fn load_landmarks() -> Result<Vec<LandmarkDefinition>> {
        browser::fetch_json::<Vec<LandmarkDefinition>>(Self::LANDMARKS_PATH)
            .await
            .with_context(|| format!("Failed to load landmarks from : {}", Self::LANDMARKS_PATH))
    }

    /// Fetched landmarks when they validate, otherwise the ones compiled in.
    fn landmarks_or_builtin(fetched: Result<Vec<LandmarkDefinition>>) -> Result<LandmarkSet> {
        match fetched.and_then(|landmarks| Ok(LandmarkSet::new(landmarks)?)) {
            Ok(landmarks) => Ok(landmarks),
            Err(err) => {
                log::warn!("using built-in landmarks: {:#}", err);
                LandmarkSet::builtin().context("built-in landmark data is broken")
            }
        }
    }
}

#[async_trait(?Send)]
impl Game for HanoiExplorer {
    async fn initialize(&self) -> Result<Box<dyn Game>> {
        match self {
            HanoiExplorer::Loading(boot) => {
                // both files are small; neither depends on the other
                let (config, landmarks) = join!(Self::load_config(), Self::load_landmarks());
                let config = GameConfig::or_default(config);
                let landmarks = Self::landmarks_or_builtin(landmarks)?;
                log::info!("{} landmarks ready", landmarks.len());

                let services = Services::new(
                    boot.bus.clone(),
                    config,
                    landmarks,
                    Rc::new(browser::LocalStorage),
                    Rc::new(WallClock),
                    Rc::new(boot.assets.clone()),
                    StdRng::from_entropy(),
                );
                *boot.progress.borrow_mut() = Some(services.store.clone());
                let mut registry = SceneRegistry::new(services);
                registry.start(SceneName::Preload);
                Ok(Box::new(HanoiExplorer::Loaded(registry)))
            }
            HanoiExplorer::Loaded(_) => Err(anyhow!("Game is already initialized")),
        }
    }

    fn update(&mut self, input: &InputState) {
        if let HanoiExplorer::Loaded(registry) = self {
            registry.tick(input);
        }
    }

    fn draw(&mut self, renderer: &Renderer) {
        if let HanoiExplorer::Loaded(registry) = self {
            renderer.clear(&CANVAS);
            registry.draw(renderer);
        }
    }

    fn shutdown(&mut self) {
        if let HanoiExplorer::Loaded(registry) = self {
            registry.shutdown();
        }
    }
}

// ==================== World Scene ====================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldPhase {
    Initializing,
    Active,
    PausedForPuzzle,
    PausedExternally,
    PausedForDialogue,
    /// The completion dialogue has run; the world stays explorable.
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicState {
    Playing,
    Paused,
    Stopped,
}

/// How a landmark is flagged on the map and minimap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkMarker {
    Completed,
    Visited,
    Unvisited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    NotReached,
    /// Threshold crossed; the dialogue opens on the next running frame.
    Pending,
    Announced,
}

/// What the world acquires in [`WorldScene::enter`], in acquisition order.
/// Shutdown gives them back last-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Held {
    Subscriptions,
    Sprites,
    Music,
    Autosave,
}

#[derive(Debug, Clone, PartialEq)]
struct Notice {
    text: String,
    until: f64,
}

const INBOX_TOPICS: [Topic; 6] = [
    Topic::PauseGame,
    Topic::ResumeGame,
    Topic::ToggleMusic,
    Topic::PlayerBoost,
    Topic::PuzzleCompleted,
    Topic::GameProgressCleared,
];

const BACK_TO_MAP_BUTTON: Rect = Rect {
    position: Point { x: 10.0, y: 100.0 },
    size: crate::engine::Size {
        width: 120.0,
        height: 40.0,
    },
};

const MINIMAP: Rect = Rect {
    position: Point { x: 490.0, y: 10.0 },
    size: crate::engine::Size {
        width: 300.0,
        height: 80.0,
    },
};

const PLAYER_SIZE: crate::engine::Size = crate::engine::Size {
    width: 40.0,
    height: 60.0,
};

fn physics(world: &WorldConfig) -> Physics {
    Physics {
        gravity: world.gravity,
        floor: world.floor,
        run_speed: world.run_speed,
        jump_speed: world.jump_speed,
        world_width: world.width,
    }
}

/// Whole metres walked from the world origin.
fn distance_at(x: f64, scale: f64) -> u32 {
    (x / scale).floor().max(0.0) as u32
}

/// Borrows the pieces of the world a finished dialogue may act on.
struct WorldHost<'a> {
    bus: &'a EventBus,
    player: &'a mut Player,
    commands: &'a mut Vec<SceneCommand>,
}

impl DialogueHost for WorldHost<'_> {
    fn bus(&self) -> &EventBus {
        self.bus
    }

    fn change_scene(&mut self, scene: SceneName) {
        self.commands.push(SceneCommand::Start(scene));
    }

    fn launch_scene(&mut self, scene: SceneName, data: SceneData) {
        self.commands.push(SceneCommand::Launch(scene, data));
    }

    fn move_player(&mut self, position: Point) {
        self.player.reposition(position);
    }
}

/// The side-scrolling street. Owns the player, the in-memory progress
/// record and every subscription it makes; all of them go away in
/// [`WorldScene::shutdown`].
pub struct WorldScene {
    instance: InstanceId,
    phase: WorldPhase,
    config: Rc<GameConfig>,
    landmarks: Rc<LandmarkSet>,
    player: Player,
    record: ProgressRecord,
    proximity: ProximityTracker,
    completion: Completion,
    dialogue: Option<Dialogue>,
    inbox: Inbox,
    subscriptions: Subscriptions,
    music: MusicState,
    // music paused by the world itself rather than the player
    music_held: bool,
    boost_ends_at: Option<f64>,
    minimap_visible: bool,
    notice: Option<Notice>,
    saved_until: Option<f64>,
    next_autosave_at: Option<f64>,
    save_requested: bool,
    // set by the completion dialogue's action, read once the step has run
    announce: Rc<Cell<bool>>,
    held: Vec<Held>,
    released: Vec<Held>,
    sprites: HashMap<LandmarkId, PendingTexture>,
    camera_x: f64,
    closed: bool,
    commands: Vec<SceneCommand>,
}

impl WorldScene {
    pub fn new(instance: InstanceId, services: &Services) -> Self {
        let config = services.config.clone();
        let spawn = config.world.spawn;
        WorldScene {
            instance,
            phase: WorldPhase::Initializing,
            player: Player::new(Point { x: spawn.x, y: spawn.y }, physics(&config.world)),
            landmarks: services.landmarks.clone(),
            record: services.store.defaults(),
            proximity: ProximityTracker::default(),
            completion: Completion::NotReached,
            dialogue: None,
            inbox: Inbox::new(),
            subscriptions: Subscriptions::new(),
            music: MusicState::Stopped,
            music_held: false,
            boost_ends_at: None,
            minimap_visible: true,
            notice: None,
            saved_until: None,
            next_autosave_at: None,
            save_requested: false,
            announce: Rc::new(Cell::new(false)),
            held: Vec::new(),
            released: Vec::new(),
            sprites: HashMap::new(),
            camera_x: 0.0,
            closed: false,
            commands: Vec::new(),
            config,
        }
    }

    /// Initializing -> Active: restores progress, subscribes, starts music.
    pub fn enter(&mut self, services: &Services) {
        self.record = services.store.load();
        let position = self.record.player_position;
        self.player.reposition(Point {
            x: position.x,
            y: position.y,
        });
        services.bus.publish(GameEvent::GameLoaded(self.record.clone()));

        self.subscriptions
            .route(&services.bus, &INBOX_TOPICS, &self.inbox);
        self.held.push(Held::Subscriptions);

        for landmark in self.landmarks.iter() {
            if let Some(path) = landmark.sprite_ref.as_deref() {
                let pending = services.assets.load_texture(self.instance, path);
                self.sprites.insert(landmark.id.clone(), pending);
            }
        }
        self.held.push(Held::Sprites);

        self.music = MusicState::Playing;
        services.bus.publish(GameEvent::MusicStarted);
        self.held.push(Held::Music);

        self.next_autosave_at = Some(services.clock.now() + self.config.progress.autosave_interval_ms);
        self.held.push(Held::Autosave);
        self.follow_camera();
        self.phase = WorldPhase::Active;
        log::info!(
            "world ready at x={} with {} landmarks visited",
            position.x,
            self.record.landmarks_visited.len()
        );
    }

    pub fn update(&mut self, input: &InputState, services: &Services) {
        if self.closed {
            return;
        }
        let now = services.clock.now();
        self.expire_notices(now);
        match self.phase {
            WorldPhase::Active | WorldPhase::Completed => self.run_frame(input, services, now),
            WorldPhase::PausedForDialogue => self.update_dialogue(input, services),
            WorldPhase::PausedExternally => {
                if input.keys.any_just_pressed(&self.config.bindings.pause) {
                    self.resume_externally(services);
                }
            }
            WorldPhase::Initializing | WorldPhase::PausedForPuzzle => {}
        }
    }

    fn run_frame(&mut self, input: &InputState, services: &Services, now: f64) {
        if self.completion == Completion::Pending {
            self.open_completion_dialogue(services);
            return;
        }
        self.end_boost_if_due(now, services);

        // 1. input
        let keys = &input.keys;
        let bindings = &self.config.bindings;
        let direction = match (keys.any_pressed(&bindings.left), keys.any_pressed(&bindings.right)) {
            (true, false) => Some(Direction::Left),
            (false, true) => Some(Direction::Right),
            _ => None,
        };
        self.player.steer(direction);
        if keys.any_just_pressed(&bindings.jump) && self.player.jump() {
            services.bus.publish(GameEvent::PlayerJumped);
        }

        // 2. physics
        self.player.update();

        // 3. proximity
        self.update_proximity(services);

        // 4. distance
        let position = self.player.position();
        self.record.player_position = Position {
            x: position.x,
            y: position.y,
        };
        self.record
            .record_distance(distance_at(position.x, self.config.world.distance_scale));

        // 5. stats
        services.bus.publish(GameEvent::GameStatsUpdate(self.stats()));
        let velocity = self.player.velocity();
        services
            .bus
            .publish(GameEvent::PlayerPositionUpdate(PlayerMotion {
                x: position.x,
                y: position.y,
                vx: velocity.x,
                vy: velocity.y,
            }));

        if self.handle_commands(input, services) {
            return;
        }

        if self.next_autosave_at.is_some_and(|at| now >= at) {
            self.save_requested = true;
            self.next_autosave_at = Some(now + self.config.progress.autosave_interval_ms);
        }
        if std::mem::take(&mut self.save_requested) {
            self.save_now(services);
        }
        self.follow_camera();
    }

    fn update_proximity(&mut self, services: &Services) {
        let nearest = self
            .landmarks
            .nearest_in_range(self.player.position().x, self.config.interaction_margin)
            .map(|landmark| landmark.id.clone());
        let change = self.proximity.update(nearest.as_ref());
        if let Some(left) = change.left.and_then(|id| self.landmarks.get(&id).cloned()) {
            services.bus.publish(GameEvent::LandmarkLeft(left));
        }
        if let Some(entered) = change.entered.and_then(|id| self.landmarks.get(&id).cloned()) {
            services.bus.publish(GameEvent::LandmarkNearby(entered));
        }
    }

    /// Edge-triggered commands. Returns true when the scene is leaving and
    /// nothing else should run this frame.
    fn handle_commands(&mut self, input: &InputState, services: &Services) -> bool {
        let keys = &input.keys;
        let config = self.config.clone();
        let bindings = &config.bindings;

        if keys.any_just_pressed(&bindings.back_to_map)
            || input.clicks.iter().any(|click| BACK_TO_MAP_BUTTON.contains(*click))
        {
            self.back_to_map(services);
            return true;
        }
        if keys.any_just_pressed(&bindings.reset) && keys.any_pressed(&bindings.reset_modifier) {
            self.reset(services);
            return true;
        }
        if keys.any_just_pressed(&bindings.interact) && self.interact(services) {
            return true;
        }
        if keys.any_just_pressed(&bindings.save) {
            self.save_requested = true;
        }
        if keys.any_just_pressed(&bindings.minimap) {
            self.minimap_visible = !self.minimap_visible;
        }
        if keys.any_just_pressed(&bindings.pause) {
            self.pause_externally(services);
        }
        false
    }

    /// Visits the nearby landmark and opens its puzzle. Progress is written
    /// before the launch is requested. Returns false with nobody nearby.
    pub fn interact(&mut self, services: &Services) -> bool {
        let Some(landmark) = self
            .proximity
            .current()
            .and_then(|id| self.landmarks.get(id))
            .cloned()
        else {
            return false;
        };
        if self.record.mark_visited(&landmark.id) {
            log::info!("visited {}", landmark.id);
        }
        services
            .bus
            .publish(GameEvent::LandmarkInteraction(landmark.clone()));
        self.check_completion();
        self.save_requested = false;
        self.save_now(services);
        self.commands.push(SceneCommand::Launch(
            SceneName::SlidingPuzzle,
            SceneData::Landmark(landmark),
        ));
        true
    }

    /// Writes the record now and shows the save indicator on success.
    pub fn save_now(&mut self, services: &Services) {
        if services.store.save(&mut self.record).is_ok() {
            services.bus.publish(GameEvent::GameSaved(self.record.clone()));
            self.saved_until = Some(services.clock.now() + self.config.progress.notice_ms);
        }
    }

    /// The host page wiped the save; the stored record is already gone,
    /// so only the run in memory starts over.
    fn progress_cleared(&mut self, services: &Services) {
        if self.closed {
            return;
        }
        log::info!("progress cleared by the host, restarting");
        self.reset(services);
    }

    /// Clears stored progress and restarts the scene from the defaults.
    fn reset(&mut self, services: &Services) {
        self.record = services.store.reset();
        self.save_requested = false;
        services.bus.publish(GameEvent::GameReset);
        self.commands.push(SceneCommand::Start(SceneName::GameScene));
    }

    fn back_to_map(&mut self, services: &Services) {
        self.save_requested = false;
        self.save_now(services);
        self.commands.push(SceneCommand::Start(SceneName::WorldMap));
    }

    fn check_completion(&mut self) {
        if self.completion == Completion::NotReached
            && self.record.landmarks_visited.len() >= self.config.progress.required_visits
        {
            log::info!(
                "{} landmarks visited, quiz unlocked",
                self.record.landmarks_visited.len()
            );
            self.completion = Completion::Pending;
        }
    }

    fn open_completion_dialogue(&mut self, services: &Services) {
        self.completion = Completion::Announced;
        let announce = self.announce.clone();
        let script = DialogueScript::new(vec![
            DialogueStep::say(format!(
                "Congratulations! You have explored {} landmarks of Hanoi.",
                self.record.landmarks_visited.len()
            )),
            DialogueStep::say(
                "Every place you visited has a story. Let's see how much of it you remember.",
            ),
            DialogueStep::say("Ready for the quiz?").then(
                "Start Quiz",
                DialogueAction::Custom(Box::new(move |_: &mut dyn DialogueHost| {
                    announce.set(true);
                })),
            ),
        ]);
        match script {
            Ok(script) => {
                let dialogue = Dialogue::open(script, &services.bus)
                    .on_complete(|| log::info!("completion dialogue finished"));
                self.dialogue = Some(dialogue);
                self.phase = WorldPhase::PausedForDialogue;
            }
            Err(err) => {
                log::error!("completion dialogue unusable: {}", err);
                self.announce_completion(services);
                self.phase = WorldPhase::Completed;
            }
        }
    }

    fn update_dialogue(&mut self, input: &InputState, services: &Services) {
        let Some(dialogue) = self.dialogue.as_mut() else {
            self.phase = self.running_phase();
            return;
        };
        let bindings = &self.config.bindings;
        let clicked = input.clicks.iter().find_map(|click| dialogue.hit(*click));
        if input.keys.any_just_pressed(&bindings.dialogue_back) || clicked == Some(DialogueButton::Back) {
            dialogue.back();
        } else if input.keys.any_just_pressed(&bindings.confirm) || clicked == Some(DialogueButton::Continue) {
            let mut host = WorldHost {
                bus: &services.bus,
                player: &mut self.player,
                commands: &mut self.commands,
            };
            dialogue.next(&mut host);
        }
        let finished = !dialogue.is_open();
        if self.announce.take() {
            self.announce_completion(services);
        }
        if finished {
            self.dialogue = None;
            self.phase = self.running_phase();
        }
    }

    /// Saves and publishes the run as it stands when the player accepts
    /// the quiz.
    fn announce_completion(&mut self, services: &Services) {
        let position = self.player.position();
        self.record.player_position = Position {
            x: position.x,
            y: position.y,
        };
        self.save_now(services);
        services
            .bus
            .publish(GameEvent::GameCompleted(self.record.clone()));
    }

    fn running_phase(&self) -> WorldPhase {
        if self.completion == Completion::Announced {
            WorldPhase::Completed
        } else {
            WorldPhase::Active
        }
    }

    fn is_running(&self) -> bool {
        matches!(self.phase, WorldPhase::Active | WorldPhase::Completed)
    }

    // ==================== Pausing ====================
    pub fn pause_for_child(&mut self, services: &Services) {
        if self.is_running() {
            self.phase = WorldPhase::PausedForPuzzle;
            self.hold_music(services);
        }
    }

    pub fn resume_from_child(&mut self, services: &Services) {
        if self.phase == WorldPhase::PausedForPuzzle {
            self.phase = self.running_phase();
            self.release_music(services);
        }
    }

    fn pause_externally(&mut self, services: &Services) {
        if !self.is_running() {
            log::debug!("pause ignored while {:?}", self.phase);
            return;
        }
        self.phase = WorldPhase::PausedExternally;
        services.bus.publish(GameEvent::GamePaused);
        self.hold_music(services);
    }

    fn resume_externally(&mut self, services: &Services) {
        if self.phase != WorldPhase::PausedExternally {
            return;
        }
        self.phase = self.running_phase();
        services.bus.publish(GameEvent::GameResumed);
        self.release_music(services);
    }

    fn hold_music(&mut self, services: &Services) {
        if self.music == MusicState::Playing {
            self.music = MusicState::Paused;
            self.music_held = true;
            services.bus.publish(GameEvent::MusicPaused);
        }
    }

    fn release_music(&mut self, services: &Services) {
        if std::mem::take(&mut self.music_held) && self.music == MusicState::Paused {
            self.music = MusicState::Playing;
            services.bus.publish(GameEvent::MusicResumed);
        }
    }

    fn toggle_music(&mut self, services: &Services) {
        self.music_held = false;
        match self.music {
            MusicState::Playing => {
                self.music = MusicState::Paused;
                services.bus.publish(GameEvent::MusicPaused);
            }
            MusicState::Paused => {
                self.music = MusicState::Playing;
                services.bus.publish(GameEvent::MusicResumed);
            }
            MusicState::Stopped => log::debug!("music is stopped, toggle ignored"),
        }
    }

    // ==================== Events ====================
    pub fn has_mail(&self) -> bool {
        !self.inbox.is_empty()
    }

    /// Reacts to what arrived on the bus since the last drain. Runs while
    /// paused too, so a puzzle result lands before the world resumes.
    pub fn handle_events(&mut self, services: &Services) {
        for event in self.inbox.drain() {
            match event {
                GameEvent::PauseGame => self.pause_externally(services),
                GameEvent::ResumeGame => self.resume_externally(services),
                GameEvent::ToggleMusic => self.toggle_music(services),
                GameEvent::PlayerBoost(boost) => self.start_boost(boost, services),
                GameEvent::PuzzleCompleted(result) => self.puzzle_completed(&result, services),
                GameEvent::GameProgressCleared => self.progress_cleared(services),
                other => log::debug!("world scene ignores {:?}", other.topic()),
            }
        }
    }

    /// A zero or negative field falls back to the configured boost.
    fn start_boost(&mut self, boost: Boost, services: &Services) {
        let defaults = &self.config.boost;
        let boost = Boost {
            speed_multiplier: if boost.speed_multiplier > 0.0 {
                boost.speed_multiplier
            } else {
                defaults.speed_multiplier
            },
            duration_ms: if boost.duration_ms > 0.0 {
                boost.duration_ms
            } else {
                defaults.duration_ms
            },
        };
        self.player.set_speed_multiplier(boost.speed_multiplier);
        self.boost_ends_at = Some(services.clock.now() + boost.duration_ms);
        services.bus.publish(GameEvent::PlayerBoostStarted(boost));
    }

    fn end_boost_if_due(&mut self, now: f64, services: &Services) {
        if self.boost_ends_at.is_some_and(|ends_at| now >= ends_at) {
            self.boost_ends_at = None;
            self.player.set_speed_multiplier(1.0);
            services.bus.publish(GameEvent::PlayerBoostEnded);
        }
    }

    fn puzzle_completed(&mut self, result: &PuzzleResult, services: &Services) {
        let Some(id) = result.landmark_id.as_ref() else {
            return;
        };
        if self.proximity.current() != Some(id) {
            log::debug!("puzzle for {} finished away from it", id);
            return;
        }
        if !self.record.mark_completed(id) {
            log::debug!("{} was already completed", id);
            return;
        }
        let name = self
            .landmarks
            .get(id)
            .map_or_else(|| id.to_string(), |landmark| landmark.name.clone());
        log::info!("completed {} in {} moves", id, result.move_count);
        self.save_now(services);
        self.notice = Some(Notice {
            text: format!("{} Completed!", name),
            until: services.clock.now() + self.config.progress.notice_ms,
        });
        self.check_completion();
    }

    pub fn take_commands(&mut self) -> Vec<SceneCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Closes any dialogue without running its action, then gives back
    /// what [`WorldScene::enter`] acquired in reverse: the autosave timer,
    /// the music, the sprites and last the subscriptions. Safe to call twice.
    pub fn shutdown(&mut self, services: &Services) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(mut dialogue) = self.dialogue.take() {
            dialogue.force_close(&services.bus);
        }
        self.announce.set(false);
        self.boost_ends_at = None;
        while let Some(held) = self.held.pop() {
            self.release(held, services);
        }
        services.bus.publish(GameEvent::GameSceneShutdown);
        log::info!("world scene shut down");
    }

    fn release(&mut self, held: Held, services: &Services) {
        log::debug!("world releases {:?}", held);
        self.released.push(held);
        match held {
            Held::Autosave => {
                self.next_autosave_at = None;
                self.save_requested = false;
            }
            Held::Music => {
                self.music = MusicState::Stopped;
                self.music_held = false;
            }
            Held::Sprites => {
                self.sprites.clear();
                services.assets.release(self.instance);
            }
            Held::Subscriptions => {
                self.subscriptions.cancel_all(&services.bus);
                self.inbox.drain();
            }
        }
    }

    fn expire_notices(&mut self, now: f64) {
        if self.notice.as_ref().is_some_and(|notice| now >= notice.until) {
            self.notice = None;
        }
        if self.saved_until.is_some_and(|until| now >= until) {
            self.saved_until = None;
        }
    }

    fn follow_camera(&mut self) {
        let world = &self.config.world;
        let max = (world.width - world.viewport_width).max(0.0);
        self.camera_x = (self.player.position().x - world.viewport_width / 2.0).clamp(0.0, max);
    }

    // ==================== Queries ====================
    pub fn phase(&self) -> WorldPhase {
        self.phase
    }

    /// Still-held resources, oldest first.
    pub fn held(&self) -> &[Held] {
        &self.held
    }

    /// Resources given back by shutdown, in the order they went.
    pub fn released(&self) -> &[Held] {
        &self.released
    }

    pub fn next_autosave_at(&self) -> Option<f64> {
        self.next_autosave_at
    }

    pub fn record(&self) -> &ProgressRecord {
        &self.record
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn music(&self) -> MusicState {
        self.music
    }

    pub fn minimap_visible(&self) -> bool {
        self.minimap_visible
    }

    pub fn nearby(&self) -> Option<&LandmarkDefinition> {
        self.proximity.current().and_then(|id| self.landmarks.get(id))
    }

    pub fn dialogue(&self) -> Option<&Dialogue> {
        self.dialogue.as_ref()
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_ref().map(|notice| notice.text.as_str())
    }

    pub fn save_indicator_visible(&self) -> bool {
        self.saved_until.is_some()
    }

    pub fn is_boosted(&self) -> bool {
        self.boost_ends_at.is_some()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn stats(&self) -> GameStats {
        GameStats {
            distance: self.record.total_distance,
            landmarks_visited: self.record.landmarks_visited.len(),
            landmarks_completed: self.record.landmarks_completed.len(),
            total_landmarks: self.landmarks.len(),
            ready_for_quiz: self.record.landmarks_visited.len() >= self.config.progress.required_visits,
        }
    }

    pub fn marker(&self, id: &LandmarkId) -> LandmarkMarker {
        if self.record.is_completed(id) {
            LandmarkMarker::Completed
        } else if self.record.is_visited(id) {
            LandmarkMarker::Visited
        } else {
            LandmarkMarker::Unvisited
        }
    }

    /// Prompt shown over the nearby landmark.
    pub fn prompt(&self) -> Option<&'static str> {
        let id = self.proximity.current()?;
        Some(if self.record.is_completed(id) {
            "Already completed!"
        } else {
            "Press SPACE to learn more"
        })
    }

    /// Moves the player without walking, as a dialogue action does.
    pub fn reposition_player(&mut self, position: Point) {
        self.player.reposition(position);
        self.follow_camera();
    }

    // ==================== Drawing ====================
    pub fn draw(&self, renderer: &Renderer) {
        let floor = self.config.world.floor;
        renderer.fill_rect(&Rect::new(0.0, 0.0, CANVAS.size.width, floor), "#87ceeb");
        renderer.fill_rect(
            &Rect::new(0.0, floor, CANVAS.size.width, CANVAS.size.height - floor),
            "#6b8e23",
        );

        for landmark in self.landmarks.iter() {
            self.draw_landmark(renderer, landmark);
        }

        let position = self.player.position();
        let body = Rect::new(
            position.x - self.camera_x - PLAYER_SIZE.width / 2.0,
            position.y - PLAYER_SIZE.height,
            PLAYER_SIZE.width,
            PLAYER_SIZE.height,
        );
        renderer.fill_rect(&body, "#c0392b");
        let eye_x = match self.player.facing() {
            Direction::Left => body.position.x + 6.0,
            Direction::Right => body.position.x + body.size.width - 14.0,
        };
        renderer.fill_rect(&Rect::new(eye_x, body.position.y + 10.0, 8.0, 8.0), "#ffffff");

        self.draw_hud(renderer);
        if let Some(dialogue) = &self.dialogue {
            dialogue.draw(renderer);
        }
    }

    fn draw_landmark(&self, renderer: &Renderer, landmark: &LandmarkDefinition) {
        let floor = self.config.world.floor;
        let screen_x = landmark.x - self.camera_x;
        if screen_x + landmark.width < 0.0 || screen_x > CANVAS.size.width {
            return;
        }
        let target = Rect::new(screen_x, floor - landmark.height, landmark.width, landmark.height);
        let drawn = match self.sprites.get(&landmark.id).map(PendingTexture::status) {
            Some(TextureStatus::Ready(handle)) => renderer.draw_texture(handle, None, &target),
            _ => false,
        };
        if !drawn {
            renderer.fill_rect(&target, &css_color(landmark.color));
            renderer.stroke_rect(&target, "#000000");
        }
        let label_at = Point {
            x: screen_x,
            y: target.position.y - 10.0,
        };
        renderer.draw_text(&landmark.name, label_at, "14px Arial", "#000000");

        let marker_at = Point {
            x: screen_x + landmark.width / 2.0 - 6.0,
            y: target.position.y - 28.0,
        };
        match self.marker(&landmark.id) {
            LandmarkMarker::Completed => renderer.draw_text("✓", marker_at, "20px Arial", "#27ae60"),
            LandmarkMarker::Visited => renderer.draw_text("●", marker_at, "20px Arial", "#f39c12"),
            LandmarkMarker::Unvisited => {}
        }

        if self.proximity.current() == Some(&landmark.id) {
            if let Some(prompt) = self.prompt() {
                let prompt_at = Point {
                    x: screen_x - 20.0,
                    y: target.position.y - 50.0,
                };
                renderer.draw_text(prompt, prompt_at, "16px Arial", "#ffff00");
            }
        }
    }

    fn draw_hud(&self, renderer: &Renderer) {
        let stats = self.stats();
        let line = format!(
            "Distance: {}m | Visited: {}/{} | Completed: {}/{}",
            stats.distance,
            stats.landmarks_visited,
            stats.total_landmarks,
            stats.landmarks_completed,
            stats.total_landmarks
        );
        renderer.draw_text(&line, Point { x: 10.0, y: 30.0 }, "16px Arial", "#000000");
        let status = if stats.ready_for_quiz {
            "READY FOR QUIZ!".to_string()
        } else {
            format!(
                "Progress: {}/{} visits",
                stats.landmarks_visited, self.config.progress.required_visits
            )
        };
        renderer.draw_text(&status, Point { x: 10.0, y: 55.0 }, "16px Arial", "#000000");
        renderer.draw_text(
            "Press M to toggle minimap",
            Point { x: 10.0, y: 80.0 },
            "12px Arial",
            "#333333",
        );

        renderer.fill_rect(&BACK_TO_MAP_BUTTON, "#ffcc99");
        renderer.stroke_rect(&BACK_TO_MAP_BUTTON, "#000000");
        renderer.draw_text("Back to Map", Point { x: 22.0, y: 126.0 }, "16px Arial", "#333333");

        if self.minimap_visible {
            self.draw_minimap(renderer);
        }
        if let Some(notice) = &self.notice {
            renderer.draw_text(&notice.text, Point { x: 280.0, y: 200.0 }, "28px Arial Black", "#27ae60");
        }
        if self.saved_until.is_some() {
            renderer.draw_text("Game Saved", Point { x: 680.0, y: 580.0 }, "16px Arial", "#ffffff");
        }
        if self.phase == WorldPhase::PausedExternally {
            renderer.fill_rect(&CANVAS, "rgba(0, 0, 0, 0.5)");
            renderer.draw_text("PAUSED", Point { x: 330.0, y: 300.0 }, "40px Arial Black", "#ffffff");
        }
    }

    fn draw_minimap(&self, renderer: &Renderer) {
        renderer.fill_rect(&MINIMAP, "rgba(0, 0, 0, 0.6)");
        renderer.stroke_rect(&MINIMAP, "#ffffff");
        let scale = MINIMAP.size.width / self.config.world.width;
        let y = MINIMAP.position.y + MINIMAP.size.height / 2.0;
        for landmark in self.landmarks.iter() {
            let color = match self.marker(&landmark.id) {
                LandmarkMarker::Completed => "#27ae60",
                LandmarkMarker::Visited => "#f39c12",
                LandmarkMarker::Unvisited => "#bdc3c7",
            };
            let x = MINIMAP.position.x + landmark.center_x() * scale;
            renderer.fill_rect(&Rect::new(x - 3.0, y - 3.0, 6.0, 6.0), color);
        }
        let player_x = MINIMAP.position.x + self.player.position().x * scale;
        renderer.fill_rect(&Rect::new(player_x - 2.0, y - 10.0, 4.0, 20.0), "#e74c3c");
    }
}
