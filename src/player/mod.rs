// ┌──────────────── State Transition Flow ──────────────────┐
// │  From State  →  Event       →  To State                 │
// ├─────────────────────────────────────────────────────────┤
// │  Idle        →  Run         →  Running                  │
// │  Running     →  Stop        →  Idle                     │
// │  Idle        →  Jump        →  Jumping                  │
// │  Running     →  Jump        →  Jumping                  │
// │  Jumping     →  Run / Stop  →  Jumping (air steering)   │
// │  -------        ------                                  │
// │  Jumping     →  Update      →  Running (when landed)    │
// │  any         →  Reposition  →  Idle                     │
// └─────────────────────────────────────────────────────────┘
// Jump only exists on the grounded states, so a jump can never stack on
// another one.
pub mod state;

use self::state::{IsJumping, PlayerContext, PlayerState, Physics};
use crate::engine::Point;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Left => -1.0,
            Direction::Right => 1.0,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Idle;
#[derive(Debug, Copy, Clone)]
pub struct Running;
#[derive(Debug, Copy, Clone)]
pub struct Jumping;

pub enum Event {
    Run(Direction),
    Stop,
    Jump,
    Update,
    Reposition(Point),
}

#[derive(Debug, Copy, Clone)]
enum PlayerStateMachine {
    Idle(PlayerState<Idle>),
    Running(PlayerState<Running>),
    Jumping(PlayerState<Jumping>),
}

impl From<PlayerState<Idle>> for PlayerStateMachine {
    fn from(state: PlayerState<Idle>) -> Self {
        PlayerStateMachine::Idle(state)
    }
}

impl From<PlayerState<Running>> for PlayerStateMachine {
    fn from(state: PlayerState<Running>) -> Self {
        PlayerStateMachine::Running(state)
    }
}

impl From<PlayerState<Jumping>> for PlayerStateMachine {
    fn from(state: PlayerState<Jumping>) -> Self {
        PlayerStateMachine::Jumping(state)
    }
}

impl From<IsJumping> for PlayerStateMachine {
    fn from(is_jumping: IsJumping) -> Self {
        match is_jumping {
            IsJumping::Done(running_state) => running_state.into(),
            IsJumping::InProgress(jumping_state) => jumping_state.into(),
        }
    }
}

impl PlayerStateMachine {
    // consumes self: the old state can't be used after a transition
    fn transition(self, event: Event) -> Self {
        use PlayerStateMachine::*;
        match (self, event) {
            (Idle(state), Event::Run(direction)) => state.run(direction).into(),
            (Running(state), Event::Run(direction)) => state.run(direction).into(),
            (Running(state), Event::Stop) => state.stop().into(),
            (Idle(state), Event::Jump) => state.jump().into(),
            (Running(state), Event::Jump) => state.jump().into(),
            (Jumping(state), Event::Run(direction)) => state.steer(Some(direction)).into(),
            (Jumping(state), Event::Stop) => state.steer(None).into(),
            (Idle(state), Event::Update) => state.update().into(),
            (Running(state), Event::Update) => state.update().into(),
            (Jumping(state), Event::Update) => state.update().into(),
            (Idle(state), Event::Reposition(at)) => state.reposition(at).into(),
            (Running(state), Event::Reposition(at)) => state.reposition(at).into(),
            (Jumping(state), Event::Reposition(at)) => state.reposition(at).into(),
            // Idle + Stop, Jumping + Jump
            (state, _) => state,
        }
    }

    fn context(&self) -> &PlayerContext {
        use PlayerStateMachine::*;
        match self {
            Idle(state) => state.context(),
            Running(state) => state.context(),
            Jumping(state) => state.context(),
        }
    }

    fn set_speed_multiplier(&mut self, multiplier: f64) {
        use PlayerStateMachine::*;
        match self {
            Idle(state) => state.set_speed_multiplier(multiplier),
            Running(state) => state.set_speed_multiplier(multiplier),
            Jumping(state) => state.set_speed_multiplier(multiplier),
        }
    }
}

/// The walking character of the world scene.
pub struct Player {
    state: PlayerStateMachine,
}

impl Player {
    pub fn new(position: Point, physics: Physics) -> Self {
        Player {
            state: PlayerStateMachine::Idle(PlayerState::new(position, physics)),
        }
    }

    pub fn update(&mut self) {
        self.state = self.state.transition(Event::Update);
    }

    /// Level-triggered horizontal intent; `None` stops.
    pub fn steer(&mut self, direction: Option<Direction>) {
        let event = match direction {
            Some(direction) => Event::Run(direction),
            None => Event::Stop,
        };
        self.state = self.state.transition(event);
    }

    /// Returns whether a jump actually started (only from the ground).
    pub fn jump(&mut self) -> bool {
        let grounded = !self.is_jumping() && self.state.context().on_floor();
        if grounded {
            self.state = self.state.transition(Event::Jump);
        }
        grounded
    }

    pub fn reposition(&mut self, position: Point) {
        self.state = self.state.transition(Event::Reposition(position));
    }

    pub fn set_speed_multiplier(&mut self, multiplier: f64) {
        self.state.set_speed_multiplier(multiplier);
        // re-apply so a running player changes pace immediately
        if let PlayerStateMachine::Running(_) | PlayerStateMachine::Jumping(_) = self.state {
            let velocity = self.velocity();
            if velocity.x != 0.0 {
                let direction = if velocity.x < 0.0 {
                    Direction::Left
                } else {
                    Direction::Right
                };
                self.steer(Some(direction));
            }
        }
    }

    pub fn position(&self) -> Point {
        self.state.context().position
    }

    pub fn velocity(&self) -> Point {
        self.state.context().velocity
    }

    pub fn facing(&self) -> Direction {
        self.state.context().facing
    }

    pub fn is_jumping(&self) -> bool {
        matches!(self.state, PlayerStateMachine::Jumping(_))
    }
}
