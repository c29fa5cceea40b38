// ┌──────────────── Scene Stack Transitions ─────────────────┐
// │  Command        →  Stack before      →  Stack after      │
// ├──────────────────────────────────────────────────────────┤
// │  Start(B)       →  [A, C*]           →  [B*]             │
// │  Launch(B)      →  [A*]              →  [A, B*]          │
// │  Close (by B)   →  [A, B*]           →  [A*]             │
// └──────────────────────────────────────────────────────────┘
//  * = Active, everything below it is Paused.
// Start exits every scene top first, Launch pauses the caller, Close
// resumes whatever is uncovered.
use crate::config::GameConfig;
use crate::engine::input::InputState;
use crate::engine::{Assets, Clock, InstanceId, InstanceIds, PendingTexture, Point, Rect, Renderer, TextureStatus};
use crate::events::{EventBus, GameEvent};
use crate::game::WorldScene;
use crate::landmark::{LandmarkDefinition, LandmarkSet};
use crate::progress::{KeyValueStorage, ProgressStore};
use crate::puzzle::PuzzleScene;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

pub const CANVAS: Rect = Rect {
    position: Point { x: 0.0, y: 0.0 },
    size: crate::engine::Size {
        width: 800.0,
        height: 600.0,
    },
};

// inbox hand-offs per tick before giving up on a publish cycle
const MAX_SETTLE_PASSES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SceneName {
    Preload,
    MainMenu,
    WorldMap,
    GameScene,
    SlidingPuzzle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneStatus {
    Active,
    Paused,
}

/// Start-up data for a launched scene.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SceneData {
    #[default]
    Empty,
    Landmark(LandmarkDefinition),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SceneCommand {
    Start(SceneName),
    Launch(SceneName, SceneData),
    /// Closes the scene that issued it.
    Close,
}

/// Everything a scene may touch outside itself. Cloning shares the same
/// bus, store, clock and assets.
#[derive(Clone)]
pub struct Services {
    pub bus: EventBus,
    pub config: Rc<GameConfig>,
    pub landmarks: Rc<LandmarkSet>,
    pub store: ProgressStore,
    pub clock: Rc<dyn Clock>,
    pub assets: Rc<dyn Assets>,
    pub rng: Rc<RefCell<StdRng>>,
}

impl Services {
    pub fn new(
        bus: EventBus,
        config: GameConfig,
        landmarks: LandmarkSet,
        storage: Rc<dyn KeyValueStorage>,
        clock: Rc<dyn Clock>,
        assets: Rc<dyn Assets>,
        rng: StdRng,
    ) -> Self {
        let store = ProgressStore::new(
            storage,
            clock.clone(),
            config.progress.storage_key.clone(),
            config.world.spawn,
        );
        Services {
            bus,
            config: Rc::new(config),
            landmarks: Rc::new(landmarks),
            store,
            clock,
            assets,
            rng: Rc::new(RefCell::new(rng)),
        }
    }
}

// ==================== Small scenes ====================
/// Warms the image cache with every landmark sprite, then opens the menu.
pub struct PreloadScene {
    instance: InstanceId,
    loads: Vec<PendingTexture>,
    finished_at: Option<f64>,
    commands: Vec<SceneCommand>,
}

const PRELOAD_LINGER_MS: f64 = 500.0;

impl PreloadScene {
    fn new(instance: InstanceId) -> Self {
        PreloadScene {
            instance,
            loads: Vec::new(),
            finished_at: None,
            commands: Vec::new(),
        }
    }

    fn enter(&mut self, services: &Services) {
        self.loads = services
            .landmarks
            .iter()
            .filter_map(|landmark| landmark.sprite_ref.as_deref())
            .map(|path| services.assets.load_texture(self.instance, path))
            .collect();
    }

    fn progress(&self) -> f64 {
        if self.loads.is_empty() {
            return 1.0;
        }
        let settled = self
            .loads
            .iter()
            .filter(|load| load.status() != TextureStatus::Pending)
            .count();
        settled as f64 / self.loads.len() as f64
    }

    fn update(&mut self, services: &Services) {
        let now = services.clock.now();
        match self.finished_at {
            None if self.progress() >= 1.0 => {
                services.bus.publish(GameEvent::PreloadComplete {
                    landmarks_count: services.landmarks.len(),
                });
                self.finished_at = Some(now);
            }
            Some(finished) if now - finished >= PRELOAD_LINGER_MS => {
                self.commands.push(SceneCommand::Start(SceneName::MainMenu));
            }
            _ => {}
        }
    }

    fn draw(&self, renderer: &Renderer) {
        renderer.fill_rect(&CANVAS, "#000000");
        renderer.draw_text("Loading Game Assets...", Point { x: 290.0, y: 280.0 }, "24px Arial Black", "#ffffff");
        renderer.stroke_rect(&Rect::new(200.0, 300.0, 400.0, 20.0), "#ffffff");
        renderer.fill_rect(&Rect::new(202.0, 302.0, 396.0 * self.progress(), 16.0), "#00ff00");
        let percent = format!("{}%", (self.progress() * 100.0).round());
        renderer.draw_text(&percent, Point { x: 385.0, y: 350.0 }, "18px Arial", "#ffffff");
    }
}

const PLAY_BUTTON: Rect = Rect {
    position: Point { x: 300.0, y: 280.0 },
    size: crate::engine::Size {
        width: 200.0,
        height: 60.0,
    },
};

pub struct MainMenuScene {
    commands: Vec<SceneCommand>,
}

impl MainMenuScene {
    fn update(&mut self, input: &InputState, services: &Services) {
        let clicked = input.clicks.iter().any(|click| PLAY_BUTTON.contains(*click));
        if clicked || input.keys.any_just_pressed(&services.config.bindings.confirm) {
            self.commands.push(SceneCommand::Start(SceneName::WorldMap));
        }
    }

    fn draw(&self, renderer: &Renderer) {
        renderer.fill_rect(&CANVAS, "#1b2838");
        renderer.draw_text("Hanoi Explorer", Point { x: 260.0, y: 180.0 }, "48px Arial Black", "#f0f0f0");
        renderer.fill_rect(&PLAY_BUTTON, "#27ae60");
        renderer.draw_text("PLAY", Point { x: 365.0, y: 320.0 }, "28px Arial Black", "#ffffff");
    }
}

const ADVENTURE_BUTTON: Rect = Rect {
    position: Point { x: 290.0, y: 320.0 },
    size: crate::engine::Size {
        width: 220.0,
        height: 60.0,
    },
};

const MAP_IMAGE: &str = "assets/map/map.jpg";

pub struct WorldMapScene {
    instance: InstanceId,
    map: Option<PendingTexture>,
    commands: Vec<SceneCommand>,
}

impl WorldMapScene {
    fn enter(&mut self, services: &Services) {
        self.map = Some(services.assets.load_texture(self.instance, MAP_IMAGE));
    }

    fn update(&mut self, input: &InputState, services: &Services) {
        let clicked = input.clicks.iter().any(|click| ADVENTURE_BUTTON.contains(*click));
        if clicked || input.keys.any_just_pressed(&services.config.bindings.confirm) {
            self.commands.push(SceneCommand::Start(SceneName::GameScene));
        }
    }

    fn draw(&self, renderer: &Renderer) {
        match self.map.as_ref().map(PendingTexture::status) {
            Some(TextureStatus::Ready(handle)) => {
                renderer.draw_texture(handle, None, &CANVAS);
            }
            _ => renderer.fill_rect(&CANVAS, "#3b5b3b"),
        }
        renderer.draw_text("Hanoi Adventure Map", Point { x: 190.0, y: 70.0 }, "48px Inter, sans-serif", "#f0f0f0");
        renderer.fill_rect(&ADVENTURE_BUTTON, "#ffcc99");
        renderer.stroke_rect(&ADVENTURE_BUTTON, "#000000");
        renderer.draw_text("Adventure Mode", Point { x: 318.0, y: 358.0 }, "24px Inter, sans-serif", "#333333");
    }
}

// ==================== Scene ====================
/// One variant per named scene; dispatch is a plain match.
pub enum Scene {
    Preload(PreloadScene),
    MainMenu(MainMenuScene),
    WorldMap(WorldMapScene),
    Game(Box<WorldScene>),
    Puzzle(Box<PuzzleScene>),
}

impl Scene {
    fn create(name: SceneName, data: SceneData, instance: InstanceId, services: &Services) -> Self {
        match name {
            SceneName::Preload => Scene::Preload(PreloadScene::new(instance)),
            SceneName::MainMenu => Scene::MainMenu(MainMenuScene {
                commands: Vec::new(),
            }),
            SceneName::WorldMap => Scene::WorldMap(WorldMapScene {
                instance,
                map: None,
                commands: Vec::new(),
            }),
            SceneName::GameScene => Scene::Game(Box::new(WorldScene::new(instance, services))),
            SceneName::SlidingPuzzle => {
                let landmark = match data {
                    SceneData::Landmark(landmark) => Some(landmark),
                    SceneData::Empty => None,
                };
                Scene::Puzzle(Box::new(PuzzleScene::new(instance, landmark, services)))
            }
        }
    }

    pub fn name(&self) -> SceneName {
        match self {
            Scene::Preload(_) => SceneName::Preload,
            Scene::MainMenu(_) => SceneName::MainMenu,
            Scene::WorldMap(_) => SceneName::WorldMap,
            Scene::Game(_) => SceneName::GameScene,
            Scene::Puzzle(_) => SceneName::SlidingPuzzle,
        }
    }

    fn enter(&mut self, services: &Services) {
        match self {
            Scene::Preload(scene) => scene.enter(services),
            Scene::WorldMap(scene) => scene.enter(services),
            Scene::Game(scene) => scene.enter(services),
            Scene::Puzzle(scene) => scene.enter(services),
            Scene::MainMenu(_) => {}
        }
        services.bus.publish(GameEvent::CurrentSceneReady(self.name()));
    }

    fn update(&mut self, input: &InputState, services: &Services) {
        match self {
            Scene::Preload(scene) => scene.update(services),
            Scene::MainMenu(scene) => scene.update(input, services),
            Scene::WorldMap(scene) => scene.update(input, services),
            Scene::Game(scene) => scene.update(input, services),
            Scene::Puzzle(scene) => scene.update(input, services),
        }
    }

    fn pause(&mut self, services: &Services) {
        if let Scene::Game(scene) = self {
            scene.pause_for_child(services);
        }
    }

    fn resume(&mut self, services: &Services) {
        if let Scene::Game(scene) = self {
            scene.resume_from_child(services);
        }
    }

    fn has_mail(&self) -> bool {
        match self {
            Scene::Game(scene) => scene.has_mail(),
            _ => false,
        }
    }

    fn handle_events(&mut self, services: &Services) {
        if let Scene::Game(scene) = self {
            scene.handle_events(services);
        }
    }

    fn take_commands(&mut self) -> Vec<SceneCommand> {
        let commands = match self {
            Scene::Preload(scene) => &mut scene.commands,
            Scene::MainMenu(scene) => &mut scene.commands,
            Scene::WorldMap(scene) => &mut scene.commands,
            Scene::Game(scene) => return scene.take_commands(),
            Scene::Puzzle(scene) => return scene.take_commands(),
        };
        std::mem::take(commands)
    }

    fn exit(&mut self, services: &Services, instance: InstanceId) {
        match self {
            Scene::Game(scene) => scene.shutdown(services),
            Scene::Puzzle(scene) => scene.exit(services),
            _ => {}
        }
        services.assets.release(instance);
    }

    fn draw(&self, renderer: &Renderer) {
        match self {
            Scene::Preload(scene) => scene.draw(renderer),
            Scene::MainMenu(scene) => scene.draw(renderer),
            Scene::WorldMap(scene) => scene.draw(renderer),
            Scene::Game(scene) => scene.draw(renderer),
            Scene::Puzzle(scene) => scene.draw(renderer),
        }
    }
}

// ==================== Registry ====================
struct Entry {
    scene: Scene,
    status: SceneStatus,
    instance: InstanceId,
}

/// Owns the scene stack. Only the top scene is updated; every scene,
/// paused or not, gets its inbox drained after each tick.
pub struct SceneRegistry {
    services: Services,
    stack: Vec<Entry>,
    ids: InstanceIds,
}

impl SceneRegistry {
    pub fn new(services: Services) -> Self {
        SceneRegistry {
            services,
            stack: Vec::new(),
            ids: InstanceIds::default(),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Replaces the whole stack with `name`.
    pub fn start(&mut self, name: SceneName) {
        self.replace_stack(name);
        self.settle();
    }

    /// Stacks `name` on top, pausing the current top.
    pub fn launch(&mut self, name: SceneName, data: SceneData) {
        self.stack_on_top(name, data);
        self.settle();
    }

    fn replace_stack(&mut self, name: SceneName) {
        log::info!("starting scene {:?}", name);
        self.clear_stack();
        self.push(name, SceneData::Empty);
    }

    fn stack_on_top(&mut self, name: SceneName, data: SceneData) {
        log::info!("launching scene {:?}", name);
        if let Some(top) = self.stack.last_mut() {
            if top.status == SceneStatus::Active {
                top.scene.pause(&self.services);
                top.status = SceneStatus::Paused;
            }
        }
        self.push(name, data);
    }

    fn push(&mut self, name: SceneName, data: SceneData) {
        let instance = self.ids.next_id();
        let mut scene = Scene::create(name, data, instance, &self.services);
        scene.enter(&self.services);
        self.stack.push(Entry {
            scene,
            status: SceneStatus::Active,
            instance,
        });
        let commands = self
            .stack
            .last_mut()
            .map(|entry| entry.scene.take_commands())
            .unwrap_or_default();
        self.apply(instance, commands);
    }

    fn close(&mut self, instance: InstanceId) {
        let Some(index) = self.stack.iter().position(|entry| entry.instance == instance) else {
            log::debug!("close from {:?} which is no longer on the stack", instance);
            return;
        };
        let mut entry = self.stack.remove(index);
        log::info!("closing scene {:?}", entry.scene.name());
        entry.scene.exit(&self.services, entry.instance);
        if index == self.stack.len() {
            if let Some(top) = self.stack.last_mut() {
                if top.status == SceneStatus::Paused {
                    top.status = SceneStatus::Active;
                    top.scene.resume(&self.services);
                }
            }
        }
    }

    fn clear_stack(&mut self) {
        while let Some(mut entry) = self.stack.pop() {
            entry.scene.exit(&self.services, entry.instance);
        }
    }

    fn apply(&mut self, issuer: InstanceId, commands: Vec<SceneCommand>) {
        for command in commands {
            match command {
                SceneCommand::Start(name) => self.replace_stack(name),
                SceneCommand::Launch(name, data) => self.stack_on_top(name, data),
                SceneCommand::Close => self.close(issuer),
            }
        }
    }

    /// Lets every scene react to what was published this tick, in stack
    /// order, until nobody has mail left.
    fn settle(&mut self) {
        for _ in 0..MAX_SETTLE_PASSES {
            if !self.stack.iter().any(|entry| entry.scene.has_mail()) {
                return;
            }
            let mut issued = Vec::new();
            for entry in self.stack.iter_mut() {
                entry.scene.handle_events(&self.services);
                let commands = entry.scene.take_commands();
                if !commands.is_empty() {
                    issued.push((entry.instance, commands));
                }
            }
            for (issuer, commands) in issued {
                self.apply(issuer, commands);
            }
        }
        log::warn!("scene events still pending after {} passes", MAX_SETTLE_PASSES);
    }

    /// One fixed step.
    pub fn tick(&mut self, input: &InputState) {
        if let Some(top) = self.stack.last_mut() {
            if top.status == SceneStatus::Active {
                top.scene.update(input, &self.services);
                let issuer = top.instance;
                let commands = top.scene.take_commands();
                self.apply(issuer, commands);
            }
        }
        self.settle();
    }

    /// Draws from the bottom so a launched scene covers its parent.
    pub fn draw(&self, renderer: &Renderer) {
        for entry in &self.stack {
            entry.scene.draw(renderer);
        }
    }

    /// Exits every scene, most recent first.
    pub fn shutdown(&mut self) {
        self.clear_stack();
    }

    pub fn stack(&self) -> Vec<(SceneName, SceneStatus)> {
        self.stack
            .iter()
            .map(|entry| (entry.scene.name(), entry.status))
            .collect()
    }

    pub fn top(&self) -> Option<SceneName> {
        self.stack.last().map(|entry| entry.scene.name())
    }

    pub fn world(&self) -> Option<&WorldScene> {
        self.stack.iter().find_map(|entry| match &entry.scene {
            Scene::Game(world) => Some(world.as_ref()),
            _ => None,
        })
    }

    pub fn puzzle(&self) -> Option<&PuzzleScene> {
        self.stack.iter().rev().find_map(|entry| match &entry.scene {
            Scene::Puzzle(puzzle) => Some(puzzle.as_ref()),
            _ => None,
        })
    }

    /// Runs `f` against the open puzzle, then applies whatever it asked for.
    pub fn with_puzzle<R>(&mut self, f: impl FnOnce(&mut PuzzleScene, &Services) -> R) -> Option<R> {
        let entry = self
            .stack
            .iter_mut()
            .rev()
            .find(|entry| matches!(entry.scene, Scene::Puzzle(_)))?;
        let Scene::Puzzle(puzzle) = &mut entry.scene else {
            return None;
        };
        let result = f(puzzle, &self.services);
        let issuer = entry.instance;
        let commands = entry.scene.take_commands();
        self.apply(issuer, commands);
        self.settle();
        Some(result)
    }

    /// Runs `f` against the world scene, then applies whatever it asked for.
    pub fn with_world<R>(&mut self, f: impl FnOnce(&mut WorldScene, &Services) -> R) -> Option<R> {
        let entry = self
            .stack
            .iter_mut()
            .find(|entry| matches!(entry.scene, Scene::Game(_)))?;
        let Scene::Game(world) = &mut entry.scene else {
            return None;
        };
        let result = f(world, &self.services);
        let issuer = entry.instance;
        let commands = entry.scene.take_commands();
        self.apply(issuer, commands);
        self.settle();
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ManualClock, MemoryAssets};
    use crate::events::{Inbox, Topic};
    use crate::progress::MemoryStorage;
    use rand::SeedableRng;

    struct Fixture {
        registry: SceneRegistry,
        clock: ManualClock,
        assets: MemoryAssets,
        inbox: Inbox,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(1_000.0);
        let assets = MemoryAssets::new();
        let services = Services::new(
            EventBus::new(),
            GameConfig::default(),
            LandmarkSet::builtin().unwrap(),
            Rc::new(MemoryStorage::new()),
            Rc::new(clock.clone()),
            Rc::new(assets.clone()),
            StdRng::seed_from_u64(7),
        );
        let inbox = Inbox::new();
        services.bus.subscribe(Topic::CurrentSceneReady, inbox.sender());
        services.bus.subscribe(Topic::PreloadComplete, inbox.sender());
        Fixture {
            registry: SceneRegistry::new(services),
            clock,
            assets,
            inbox,
        }
    }

    fn press(code: &str) -> InputState {
        let mut input = InputState::default();
        input.keys.set_pressed(code);
        input
    }

    #[test]
    fn preload_reports_then_opens_the_menu() {
        let Fixture {
            mut registry,
            clock,
            inbox,
            ..
        } = fixture();
        registry.start(SceneName::Preload);
        registry.tick(&InputState::default());
        assert_eq!(
            inbox.drain(),
            vec![
                GameEvent::CurrentSceneReady(SceneName::Preload),
                GameEvent::PreloadComplete { landmarks_count: 5 }
            ]
        );

        clock.advance(PRELOAD_LINGER_MS);
        registry.tick(&InputState::default());
        assert_eq!(registry.stack(), vec![(SceneName::MainMenu, SceneStatus::Active)]);
        assert_eq!(inbox.drain(), vec![GameEvent::CurrentSceneReady(SceneName::MainMenu)]);
    }

    #[test]
    fn menu_and_map_lead_to_the_game() {
        let mut registry = fixture().registry;
        registry.start(SceneName::MainMenu);
        registry.tick(&press("Enter"));
        assert_eq!(registry.top(), Some(SceneName::WorldMap));

        let mut click = InputState::default();
        click.clicks.push(Point { x: 400.0, y: 350.0 });
        registry.tick(&click);
        assert_eq!(registry.top(), Some(SceneName::GameScene));
        assert!(registry.world().is_some());
    }

    #[test]
    fn launch_pauses_and_close_resumes() {
        let mut registry = fixture().registry;
        registry.start(SceneName::GameScene);
        registry.launch(SceneName::SlidingPuzzle, SceneData::Empty);
        assert_eq!(
            registry.stack(),
            vec![
                (SceneName::GameScene, SceneStatus::Paused),
                (SceneName::SlidingPuzzle, SceneStatus::Active)
            ]
        );

        registry.with_puzzle(|puzzle, services| puzzle.back(services));
        assert_eq!(registry.stack(), vec![(SceneName::GameScene, SceneStatus::Active)]);
    }

    #[test]
    fn start_replaces_the_whole_stack() {
        let mut registry = fixture().registry;
        let baseline = registry.services().bus.total_subscribers();
        registry.start(SceneName::GameScene);
        registry.launch(SceneName::SlidingPuzzle, SceneData::Empty);
        registry.start(SceneName::WorldMap);
        assert_eq!(registry.stack(), vec![(SceneName::WorldMap, SceneStatus::Active)]);
        assert_eq!(registry.services().bus.total_subscribers(), baseline);
    }

    #[test]
    fn shutdown_releases_textures_of_every_scene() {
        let Fixture {
            mut registry,
            assets,
            ..
        } = fixture();
        registry.start(SceneName::WorldMap);
        registry.launch(SceneName::SlidingPuzzle, SceneData::Empty);
        assert_eq!(assets.loaded(), 2);

        registry.shutdown();
        assert_eq!(assets.loaded(), 0);
        assert!(registry.stack().is_empty());
        assert_eq!(registry.top(), None);
    }
}
