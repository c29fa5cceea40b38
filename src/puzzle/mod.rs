// ┌──────────────── State Transition Flow ──────────────────┐
// │  From State  →  Event      →  To State                  │
// ├─────────────────────────────────────────────────────────┤
// │  Loading     →  ArtReady   →  Shuffling                 │
// │  Shuffling   →  Shuffle    →  Playable                  │
// │  Playable    →  Move       →  Playable                  │
// │  Playable    →  Move       →  Solved (board in order)   │
// │  Playable    →  Reshuffle  →  Shuffling                 │
// │  -------        ------                                  │
// │  Solved      →  anything   →  Solved                    │
// └─────────────────────────────────────────────────────────┘
pub mod board;
pub mod state;

use self::board::{Board, MoveError, Slide};
use self::state::{IsSolved, PuzzleContext, PuzzleState, TileArt};
use crate::engine::input::InputState;
use crate::engine::{InstanceId, PendingTexture, Point, Rect, Renderer, TextureStatus};
use crate::events::GameEvent;
use crate::landmark::{LandmarkDefinition, LandmarkId};
use crate::scene::{SceneCommand, Services, CANVAS};
use rand::seq::SliceRandom;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Copy, Clone)]
pub struct Loading;
#[derive(Debug, Copy, Clone)]
pub struct Shuffling;
#[derive(Debug, Copy, Clone)]
pub struct Playable;
#[derive(Debug, Copy, Clone)]
pub struct Solved;

/// Payload of `puzzle-completed` and of an acknowledged `puzzle-closed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PuzzleResult {
    pub landmark_id: Option<LandmarkId>,
    pub move_count: u32,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PuzzlePhase {
    Loading,
    Shuffling,
    Playable,
    Solved,
}

pub enum Event<'a> {
    ArtReady(TileArt),
    Shuffle {
        rng: &'a mut dyn RngCore,
        moves: usize,
        now: f64,
    },
    Move {
        cell: usize,
        now: f64,
    },
    Tick(f64),
    Reshuffle,
}

#[derive(Debug, Clone)]
enum PuzzleStateMachine {
    Loading(PuzzleState<Loading>),
    Shuffling(PuzzleState<Shuffling>),
    Playable(PuzzleState<Playable>),
    Solved(PuzzleState<Solved>),
}

impl From<PuzzleState<Loading>> for PuzzleStateMachine {
    fn from(state: PuzzleState<Loading>) -> Self {
        PuzzleStateMachine::Loading(state)
    }
}

impl From<PuzzleState<Shuffling>> for PuzzleStateMachine {
    fn from(state: PuzzleState<Shuffling>) -> Self {
        PuzzleStateMachine::Shuffling(state)
    }
}

impl From<PuzzleState<Playable>> for PuzzleStateMachine {
    fn from(state: PuzzleState<Playable>) -> Self {
        PuzzleStateMachine::Playable(state)
    }
}

impl From<PuzzleState<Solved>> for PuzzleStateMachine {
    fn from(state: PuzzleState<Solved>) -> Self {
        PuzzleStateMachine::Solved(state)
    }
}

impl From<IsSolved> for PuzzleStateMachine {
    fn from(is_solved: IsSolved) -> Self {
        match is_solved {
            IsSolved::Done(solved) => solved.into(),
            IsSolved::InProgress(playable) => playable.into(),
        }
    }
}

impl PuzzleStateMachine {
    fn transition(self, event: Event) -> Self {
        use PuzzleStateMachine::*;
        match (self, event) {
            (Loading(state), Event::ArtReady(art)) => state.art_ready(art).into(),
            (Shuffling(state), Event::Shuffle { rng, moves, now }) => {
                state.shuffle(rng, moves, now).into()
            }
            (Playable(state), Event::Move { cell, now }) => state.move_tile(cell, now).into(),
            (Playable(mut state), Event::Tick(now)) => {
                state.tick(now);
                state.into()
            }
            (Playable(state), Event::Reshuffle) => state.reshuffle().into(),
            (state, _) => state,
        }
    }

    fn context(&self) -> &PuzzleContext {
        use PuzzleStateMachine::*;
        match self {
            Loading(state) => state.context(),
            Shuffling(state) => state.context(),
            Playable(state) => state.context(),
            Solved(state) => state.context(),
        }
    }

    fn phase(&self) -> PuzzlePhase {
        match self {
            PuzzleStateMachine::Loading(_) => PuzzlePhase::Loading,
            PuzzleStateMachine::Shuffling(_) => PuzzlePhase::Shuffling,
            PuzzleStateMachine::Playable(_) => PuzzlePhase::Playable,
            PuzzleStateMachine::Solved(_) => PuzzlePhase::Solved,
        }
    }
}

// ==================== Layout ====================
const BOARD_CENTER_X: f64 = 400.0;
const BOARD_TOP: f64 = 160.0;

const BACK_BUTTON: Rect = Rect {
    position: Point { x: 50.0, y: 40.0 },
    size: crate::engine::Size {
        width: 110.0,
        height: 36.0,
    },
};

const SHUFFLE_BUTTON: Rect = Rect {
    position: Point { x: 600.0, y: 490.0 },
    size: crate::engine::Size {
        width: 120.0,
        height: 36.0,
    },
};

const CONTINUE_BUTTON: Rect = Rect {
    position: Point { x: 330.0, y: 330.0 },
    size: crate::engine::Size {
        width: 140.0,
        height: 44.0,
    },
};

/// Screen placement of the board cells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoardLayout {
    origin: Point,
    tile: f64,
    gap: f64,
    size: usize,
}

impl BoardLayout {
    pub fn new(size: usize, tile: f64, gap: f64) -> Self {
        let span = size as f64 * (tile + gap);
        BoardLayout {
            origin: Point {
                x: BOARD_CENTER_X - span / 2.0,
                y: BOARD_TOP,
            },
            tile,
            gap,
            size,
        }
    }

    pub fn cell_rect(&self, cell: usize) -> Rect {
        let (row, col) = (cell / self.size, cell % self.size);
        Rect::new(
            self.origin.x + col as f64 * (self.tile + self.gap),
            self.origin.y + row as f64 * (self.tile + self.gap),
            self.tile,
            self.tile,
        )
    }

    /// Gaps between cells hit nothing.
    pub fn cell_at(&self, point: Point) -> Option<usize> {
        (0..self.size * self.size).find(|cell| self.cell_rect(*cell).contains(point))
    }
}

// ==================== Scene ====================
/// One puzzle instantiation. Owns its textures through `instance` and
/// releases them on exit.
pub struct PuzzleScene {
    instance: InstanceId,
    landmark: Option<LandmarkDefinition>,
    machine: Option<PuzzleStateMachine>,
    images: VecDeque<String>,
    pending: Option<PendingTexture>,
    shuffle_moves: usize,
    layout: BoardLayout,
    closed: bool,
    commands: Vec<SceneCommand>,
}

impl PuzzleScene {
    /// Tries the landmark's own image first, then one picked at random from
    /// the configured pool, then falls back to numbered tiles.
    pub fn new(instance: InstanceId, landmark: Option<LandmarkDefinition>, services: &Services) -> Self {
        let config = &services.config.puzzle;
        let mut images = VecDeque::new();
        if let Some(own) = landmark.as_ref().and_then(|l| l.puzzle_image_ref.clone()) {
            images.push_back(own);
        }
        if let Some(default) = config.images.choose(&mut *services.rng.borrow_mut()) {
            if !images.contains(default) {
                images.push_back(default.clone());
            }
        }
        PuzzleScene {
            instance,
            landmark,
            machine: Some(PuzzleState::new(config.grid_size).into()),
            images,
            pending: None,
            shuffle_moves: config.shuffle_moves,
            layout: BoardLayout::new(config.grid_size, config.tile_size, config.gap),
            closed: false,
            commands: Vec::new(),
        }
    }

    pub fn enter(&mut self, services: &Services) {
        if let Some(landmark) = &self.landmark {
            services.bus.publish(GameEvent::PuzzleLaunched(landmark.clone()));
        }
        self.request_next_image(services);
    }

    fn fire(&mut self, event: Event) {
        if let Some(machine) = self.machine.take() {
            self.machine = Some(machine.transition(event));
        }
    }

    fn request_next_image(&mut self, services: &Services) {
        match self.images.pop_front() {
            Some(path) => {
                log::debug!("puzzle image {}", path);
                self.pending = Some(services.assets.load_texture(self.instance, &path));
            }
            None => {
                log::warn!("no puzzle image could be loaded, using numbered tiles");
                self.pending = None;
                self.fire(Event::ArtReady(TileArt::Numbered));
            }
        }
    }

    /// Advances the image fallback chain while loading.
    fn poll_art(&mut self, services: &Services) {
        if self.phase() != PuzzlePhase::Loading {
            return;
        }
        match self.pending.as_ref().map(PendingTexture::status) {
            Some(TextureStatus::Ready(handle)) => {
                self.pending = None;
                self.fire(Event::ArtReady(TileArt::Image(handle)));
            }
            Some(TextureStatus::Failed) => self.request_next_image(services),
            Some(TextureStatus::Pending) => {}
            None => self.request_next_image(services),
        }
    }

    pub fn update(&mut self, input: &InputState, services: &Services) {
        if self.closed {
            return;
        }
        self.poll_art(services);
        let now = services.clock.now();
        if self.phase() == PuzzlePhase::Shuffling {
            let moves = self.shuffle_moves;
            let mut rng = services.rng.borrow_mut();
            self.fire(Event::Shuffle {
                rng: &mut *rng,
                moves,
                now,
            });
        }
        self.fire(Event::Tick(now));
        self.handle_input(input, services);
    }

    fn handle_input(&mut self, input: &InputState, services: &Services) {
        let bindings = &services.config.bindings;
        let keys = &input.keys;

        if keys.any_just_pressed(&bindings.puzzle_back)
            || input.clicks.iter().any(|click| BACK_BUTTON.contains(*click))
        {
            self.back(services);
            return;
        }
        if self.phase() == PuzzlePhase::Solved {
            if keys.any_just_pressed(&bindings.confirm)
                || input.clicks.iter().any(|click| CONTINUE_BUTTON.contains(*click))
            {
                self.confirm(services);
            }
            return;
        }
        if keys.any_just_pressed(&bindings.puzzle_shuffle)
            || input.clicks.iter().any(|click| SHUFFLE_BUTTON.contains(*click))
        {
            self.reshuffle();
            return;
        }

        let slides = [
            (&bindings.puzzle_up, Slide::Up),
            (&bindings.puzzle_down, Slide::Down),
            (&bindings.puzzle_left, Slide::Left),
            (&bindings.puzzle_right, Slide::Right),
        ];
        for (codes, slide) in slides {
            if keys.any_just_pressed(codes) {
                if let Err(err) = self.slide(slide, services) {
                    log::debug!("ignored slide {:?}: {}", slide, err);
                }
            }
        }
        for click in &input.clicks {
            if let Some(cell) = self.layout.cell_at(*click) {
                if let Err(err) = self.move_tile(cell, services) {
                    log::debug!("ignored click: {}", err);
                }
            }
        }
    }

    /// Slides the tile at `cell` into the gap. Solving the board publishes
    /// `puzzle-completed` once; the scene then waits for [`Self::confirm`].
    pub fn move_tile(&mut self, cell: usize, services: &Services) -> Result<(), MoveError> {
        match &self.machine {
            Some(PuzzleStateMachine::Playable(state)) => state.context().board.check_move(cell)?,
            _ => return Err(MoveError::NotPlayable),
        }
        self.fire(Event::Move {
            cell,
            now: services.clock.now(),
        });
        if self.phase() == PuzzlePhase::Solved {
            let result = self.result();
            log::info!(
                "puzzle solved in {} moves, {} ms",
                result.move_count,
                result.elapsed_ms
            );
            services.bus.publish(GameEvent::PuzzleCompleted(result));
        }
        Ok(())
    }

    pub fn slide(&mut self, slide: Slide, services: &Services) -> Result<(), MoveError> {
        let board = self.board().ok_or(MoveError::NotPlayable)?;
        let cell = board.slide_source(slide).ok_or(MoveError::OutOfBounds(board.cells()))?;
        self.move_tile(cell, services)
    }

    /// New shuffle on the next update; moves and timer start over.
    pub fn reshuffle(&mut self) {
        self.fire(Event::Reshuffle);
    }

    /// Acknowledges a solved board and closes the puzzle.
    pub fn confirm(&mut self, services: &Services) {
        if self.closed || self.phase() != PuzzlePhase::Solved {
            return;
        }
        self.closed = true;
        services.bus.publish(GameEvent::PuzzleClosed(Some(self.result())));
        self.commands.push(SceneCommand::Close);
    }

    /// Leaves the puzzle. After solving this is the same as confirming.
    pub fn back(&mut self, services: &Services) {
        if self.closed {
            return;
        }
        if self.phase() == PuzzlePhase::Solved {
            self.confirm(services);
            return;
        }
        self.closed = true;
        services.bus.publish(GameEvent::PuzzleExit);
        services.bus.publish(GameEvent::PuzzleClosed(None));
        self.commands.push(SceneCommand::Close);
    }

    pub fn exit(&mut self, services: &Services) {
        self.pending = None;
        self.machine = None;
        services.assets.release(self.instance);
    }

    pub fn take_commands(&mut self) -> Vec<SceneCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn phase(&self) -> PuzzlePhase {
        self.machine
            .as_ref()
            .map_or(PuzzlePhase::Loading, PuzzleStateMachine::phase)
    }

    pub fn board(&self) -> Option<&Board> {
        self.machine.as_ref().map(|machine| &machine.context().board)
    }

    pub fn art(&self) -> Option<TileArt> {
        self.machine.as_ref().map(|machine| machine.context().art)
    }

    pub fn landmark(&self) -> Option<&LandmarkDefinition> {
        self.landmark.as_ref()
    }

    pub fn layout(&self) -> BoardLayout {
        self.layout
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn result(&self) -> PuzzleResult {
        let (move_count, elapsed_ms) = self
            .machine
            .as_ref()
            .map(|machine| (machine.context().move_count, machine.context().elapsed_ms))
            .unwrap_or_default();
        PuzzleResult {
            landmark_id: self.landmark.as_ref().map(|landmark| landmark.id.clone()),
            move_count,
            elapsed_ms,
        }
    }

    pub fn draw(&self, renderer: &Renderer) {
        let Some(machine) = &self.machine else {
            return;
        };
        let context = machine.context();
        renderer.fill_rect(&CANVAS, "#2c3e50");
        renderer.draw_text("SLIDING PUZZLE", Point { x: 270.0, y: 60.0 }, "32px Arial Black", "#ffffff");
        let subtitle = match &self.landmark {
            Some(landmark) => format!("Rebuild the picture of {}", landmark.name),
            None => "Arrange the pieces to complete the image".to_string(),
        };
        renderer.draw_text(&subtitle, Point { x: 230.0, y: 100.0 }, "16px Arial", "#bdc3c7");

        let board = &context.board;
        for cell in 0..board.cells() {
            let target = self.layout.cell_rect(cell);
            match board.tile_at(cell) {
                None => renderer.fill_rect(&target, "rgba(52, 73, 94, 0.3)"),
                Some(tile) => self.draw_tile(renderer, context.art, board.size(), tile, &target),
            }
        }

        renderer.fill_rect(&BACK_BUTTON, "#95a5a6");
        renderer.draw_text("← BACK", Point { x: 65.0, y: 64.0 }, "18px Arial", "#ffffff");
        renderer.fill_rect(&SHUFFLE_BUTTON, "#e74c3c");
        renderer.draw_text("SHUFFLE", Point { x: 620.0, y: 514.0 }, "18px Arial", "#ffffff");
        let moves = format!("Moves: {}", context.move_count);
        renderer.draw_text(&moves, Point { x: 200.0, y: 514.0 }, "20px Arial", "#ffffff");
        renderer.draw_text(&format_clock(context.elapsed_ms), Point { x: 350.0, y: 514.0 }, "20px Arial", "#ffffff");

        if machine.phase() == PuzzlePhase::Solved {
            renderer.fill_rect(&Rect::new(150.0, 175.0, 500.0, 250.0), "rgba(0, 0, 0, 0.9)");
            renderer.stroke_rect(&Rect::new(150.0, 175.0, 500.0, 250.0), "#2ecc71");
            renderer.draw_text("PUZZLE COMPLETE!", Point { x: 250.0, y: 230.0 }, "32px Arial Black", "#2ecc71");
            renderer.draw_text(&moves, Point { x: 350.0, y: 280.0 }, "20px Arial", "#ffffff");
            renderer.fill_rect(&CONTINUE_BUTTON, "#27ae60");
            renderer.draw_text("CONTINUE", Point { x: 345.0, y: 360.0 }, "22px Arial", "#ffffff");
        }
    }

    fn draw_tile(&self, renderer: &Renderer, art: TileArt, size: usize, tile: usize, target: &Rect) {
        if let TileArt::Image(handle) = art {
            if let Some(source) = renderer.texture_size(handle) {
                let (row, col) = ((tile / size) as f64, (tile % size) as f64);
                let (width, height) = (source.width / size as f64, source.height / size as f64);
                let frame = Rect::new(col * width, row * height, width, height);
                if renderer.draw_texture(handle, Some(&frame), target) {
                    renderer.stroke_rect(target, "#2c3e50");
                    return;
                }
            }
        }
        renderer.fill_rect(target, "#3498db");
        renderer.stroke_rect(target, "#2c3e50");
        let label = Point {
            x: target.position.x + target.size.width / 2.0 - 8.0,
            y: target.position.y + target.size.height / 2.0 + 8.0,
        };
        renderer.draw_text(&(tile + 1).to_string(), label, "24px Arial Black", "#ffffff");
    }
}

fn format_clock(elapsed_ms: f64) -> String {
    let seconds = (elapsed_ms.max(0.0) / 1000.0).floor() as u64;
    format!("Time: {:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::engine::{ManualClock, MemoryAssets};
    use crate::events::{EventBus, Inbox, Topic};
    use crate::landmark::LandmarkSet;
    use crate::progress::MemoryStorage;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::{HashMap, VecDeque as Queue};
    use std::rc::Rc;

    struct Fixture {
        services: Services,
        clock: ManualClock,
        assets: MemoryAssets,
        inbox: Inbox,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(10_000.0);
        let assets = MemoryAssets::new();
        let mut config = GameConfig::default();
        // short shuffles keep the breadth-first solver quick
        config.puzzle.shuffle_moves = 40;
        let services = Services::new(
            EventBus::new(),
            config,
            LandmarkSet::builtin().unwrap(),
            Rc::new(MemoryStorage::new()),
            Rc::new(clock.clone()),
            Rc::new(assets.clone()),
            StdRng::seed_from_u64(3),
        );
        let inbox = Inbox::new();
        for topic in [
            Topic::PuzzleLaunched,
            Topic::PuzzleCompleted,
            Topic::PuzzleExit,
            Topic::PuzzleClosed,
        ] {
            services.bus.subscribe(topic, inbox.sender());
        }
        Fixture {
            services,
            clock,
            assets,
            inbox,
        }
    }

    fn temple(services: &Services) -> LandmarkDefinition {
        services
            .landmarks
            .get(&LandmarkId::from("temple-literature"))
            .cloned()
            .unwrap()
    }

    fn ready_puzzle(fixture: &Fixture, landmark: Option<LandmarkDefinition>) -> PuzzleScene {
        let ids = &mut crate::engine::InstanceIds::default();
        let mut puzzle = PuzzleScene::new(ids.next_id(), landmark, &fixture.services);
        puzzle.enter(&fixture.services);
        // Loading -> Shuffling -> Playable
        puzzle.update(&InputState::default(), &fixture.services);
        puzzle
    }

    /// Breadth-first path back to the solved layout.
    fn solution(board: &Board) -> Vec<usize> {
        let mut parents: HashMap<Board, Option<(Board, usize)>> = HashMap::new();
        let mut queue = Queue::new();
        parents.insert(board.clone(), None);
        queue.push_back(board.clone());
        while let Some(current) = queue.pop_front() {
            if current.is_solved() {
                let mut path = Vec::new();
                let mut at = current;
                while let Some(Some((parent, cell))) = parents.get(&at).cloned() {
                    path.push(cell);
                    at = parent;
                }
                path.reverse();
                return path;
            }
            for cell in current.legal_moves() {
                let mut next = current.clone();
                next.try_move(cell).unwrap();
                if !parents.contains_key(&next) {
                    parents.insert(next.clone(), Some((current.clone(), cell)));
                    queue.push_back(next);
                }
            }
        }
        panic!("board has no solution");
    }

    fn solve(puzzle: &mut PuzzleScene, services: &Services) {
        let path = solution(puzzle.board().unwrap());
        for cell in path {
            puzzle.move_tile(cell, services).unwrap();
        }
    }

    #[test]
    fn becomes_playable_after_loading_and_shuffling() {
        let fixture = fixture();
        let mut puzzle = PuzzleScene::new(
            crate::engine::InstanceIds::default().next_id(),
            Some(temple(&fixture.services)),
            &fixture.services,
        );
        assert_eq!(puzzle.phase(), PuzzlePhase::Loading);
        puzzle.enter(&fixture.services);
        assert_eq!(
            fixture.inbox.drain(),
            vec![GameEvent::PuzzleLaunched(temple(&fixture.services))]
        );

        puzzle.update(&InputState::default(), &fixture.services);
        assert_eq!(puzzle.phase(), PuzzlePhase::Playable);
        let board = puzzle.board().unwrap();
        assert!(board.is_solvable());
        assert!(!board.is_solved());
        assert!(matches!(puzzle.art(), Some(TileArt::Image(_))));
    }

    #[test]
    fn image_fallback_ends_in_numbered_tiles() {
        let fixture = fixture();
        let mut landmark = temple(&fixture.services);
        landmark.puzzle_image_ref = Some("assets/puzzle/broken.webp".into());
        fixture.assets.mark_missing("assets/puzzle/broken.webp");
        for image in &fixture.services.config.puzzle.images {
            fixture.assets.mark_missing(image);
        }

        let mut puzzle = ready_puzzle(&fixture, Some(landmark));
        for _ in 0..3 {
            puzzle.update(&InputState::default(), &fixture.services);
        }
        assert_eq!(puzzle.art(), Some(TileArt::Numbered));
        assert_eq!(puzzle.phase(), PuzzlePhase::Playable);
    }

    #[test]
    fn illegal_moves_are_reported() {
        let fixture = fixture();
        let mut puzzle = ready_puzzle(&fixture, None);
        let board = puzzle.board().unwrap().clone();
        let far = (0..board.cells())
            .find(|cell| !board.legal_moves().contains(cell) && *cell != board.empty_cell())
            .unwrap();
        assert_eq!(
            puzzle.move_tile(far, &fixture.services),
            Err(MoveError::NotAdjacent(far))
        );
        assert_eq!(puzzle.board(), Some(&board));
        assert_eq!(puzzle.result().move_count, 0);
    }

    #[test]
    fn solving_publishes_completion_and_waits_for_continue() {
        let fixture = fixture();
        let landmark = temple(&fixture.services);
        let mut puzzle = ready_puzzle(&fixture, Some(landmark.clone()));
        fixture.inbox.drain();

        fixture.clock.advance(4_500.0);
        solve(&mut puzzle, &fixture.services);

        assert_eq!(puzzle.phase(), PuzzlePhase::Solved);
        let events = fixture.inbox.drain();
        assert_eq!(events.len(), 1);
        let GameEvent::PuzzleCompleted(result) = &events[0] else {
            panic!("expected puzzle-completed, got {:?}", events[0]);
        };
        assert!(result.move_count >= 1);
        assert_eq!(result.elapsed_ms, 4_500.0);
        assert_eq!(result.landmark_id, Some(landmark.id.clone()));
        assert!(puzzle.take_commands().is_empty(), "no auto close");

        assert_eq!(
            puzzle.move_tile(puzzle.board().unwrap().legal_moves()[0], &fixture.services),
            Err(MoveError::NotPlayable)
        );

        puzzle.confirm(&fixture.services);
        puzzle.confirm(&fixture.services);
        assert_eq!(puzzle.take_commands(), vec![SceneCommand::Close]);
        assert_eq!(
            fixture.inbox.drain(),
            vec![GameEvent::PuzzleClosed(Some(result.clone()))]
        );
    }

    #[test]
    fn back_before_solving_exits_without_result() {
        let fixture = fixture();
        let mut puzzle = ready_puzzle(&fixture, None);
        fixture.inbox.drain();

        let mut input = InputState::default();
        input.keys.set_pressed("Escape");
        puzzle.update(&input, &fixture.services);

        assert_eq!(
            fixture.inbox.drain(),
            vec![GameEvent::PuzzleExit, GameEvent::PuzzleClosed(None)]
        );
        assert_eq!(puzzle.take_commands(), vec![SceneCommand::Close]);
    }

    #[test]
    fn reshuffle_restarts_moves_and_clock() {
        let fixture = fixture();
        let mut puzzle = ready_puzzle(&fixture, None);
        let cell = puzzle.board().unwrap().legal_moves()[0];
        puzzle.move_tile(cell, &fixture.services).unwrap();
        fixture.clock.advance(2_000.0);

        puzzle.reshuffle();
        assert_eq!(puzzle.phase(), PuzzlePhase::Shuffling);
        puzzle.update(&InputState::default(), &fixture.services);

        assert_eq!(puzzle.phase(), PuzzlePhase::Playable);
        assert_eq!(puzzle.result().move_count, 0);
        assert_eq!(puzzle.result().elapsed_ms, 0.0);
    }

    #[test]
    fn keyboard_and_pointer_move_tiles() {
        let fixture = fixture();
        let mut puzzle = ready_puzzle(&fixture, None);
        let board = puzzle.board().unwrap().clone();
        let (slide, codes) = [
            (Slide::Up, "ArrowUp"),
            (Slide::Down, "ArrowDown"),
            (Slide::Left, "ArrowLeft"),
            (Slide::Right, "ArrowRight"),
        ]
        .into_iter()
        .find(|(slide, _)| board.slide_source(*slide).is_some())
        .unwrap();
        let source = board.slide_source(slide).unwrap();

        let mut input = InputState::default();
        input.keys.set_pressed(codes);
        puzzle.update(&input, &fixture.services);
        assert_eq!(puzzle.board().unwrap().empty_cell(), source);

        // click the cell the gap just left
        let back = board.empty_cell();
        let rect = puzzle.layout().cell_rect(back);
        let mut click = InputState::default();
        click.clicks.push(Point {
            x: rect.position.x + 1.0,
            y: rect.position.y + 1.0,
        });
        puzzle.update(&click, &fixture.services);
        assert_eq!(puzzle.board().unwrap().empty_cell(), back);
        assert_eq!(puzzle.result().move_count, 2);
    }

    #[test]
    fn exit_releases_only_this_instance() {
        let fixture = fixture();
        let mut ids = crate::engine::InstanceIds::default();
        let mut first = PuzzleScene::new(ids.next_id(), None, &fixture.services);
        let mut second = PuzzleScene::new(ids.next_id(), None, &fixture.services);
        first.enter(&fixture.services);
        second.enter(&fixture.services);
        assert_eq!(fixture.assets.loaded(), 2);

        first.exit(&fixture.services);
        assert_eq!(fixture.assets.loaded(), 1);
        second.update(&InputState::default(), &fixture.services);
        assert!(matches!(second.art(), Some(TileArt::Image(_))));
    }

    #[test]
    fn layout_maps_points_to_cells() {
        let layout = BoardLayout::new(3, 80.0, 2.0);
        let centre = layout.cell_rect(4);
        let inside = Point {
            x: centre.position.x + 40.0,
            y: centre.position.y + 40.0,
        };
        assert_eq!(layout.cell_at(inside), Some(4));
        assert_eq!(layout.cell_at(Point { x: 0.0, y: 0.0 }), None);
    }
}
