/// All code relating to individual states is behind this module and enforces
/// unrepresentable states: a transition can only be reached through the
/// methods provided here.
/// - PUBLIC  : PlayerState and PlayerContext
/// - PRIVATE : the fields that make up a state
use super::{Direction, Idle, Jumping, Running};
use crate::engine::Point;

/// World physics the player obeys, per fixed step.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Physics {
    pub gravity: f64,
    pub floor: f64,
    pub run_speed: f64,
    /// Negative because the origin is top left.
    pub jump_speed: f64,
    pub world_width: f64,
}

pub enum IsJumping {
    Done(PlayerState<Running>),
    InProgress(PlayerState<Jumping>),
}

#[derive(Debug, Copy, Clone)]
/// Shared data for every state:
/// - physics : position + velocity
/// - display : facing
pub struct PlayerContext {
    pub position: Point,
    pub velocity: Point,
    pub facing: Direction,
    pub speed_multiplier: f64,
    physics: Physics,
}

#[derive(Debug, Copy, Clone)]
pub struct PlayerState<S> {
    context: PlayerContext,
    // type-level tag only, never read
    _state: S,
}

/// Methods shared by all states.
impl<S> PlayerState<S> {
    pub fn context(&self) -> &PlayerContext {
        &self.context
    }

    pub fn reposition(self, position: Point) -> PlayerState<Idle> {
        PlayerState {
            context: self.context.stop().with_position(position),
            _state: Idle,
        }
    }

    pub fn set_speed_multiplier(&mut self, multiplier: f64) {
        self.context.speed_multiplier = multiplier;
    }
}

impl PlayerState<Idle> {
    pub fn new(position: Point, physics: Physics) -> Self {
        PlayerState {
            context: PlayerContext {
                position,
                velocity: Point::default(),
                facing: Direction::Right,
                speed_multiplier: 1.0,
                physics,
            }
            .with_position(position),
            _state: Idle,
        }
    }

    pub fn update(mut self) -> Self {
        self.context = self.context.update();
        self
    }

    pub fn run(self, direction: Direction) -> PlayerState<Running> {
        PlayerState {
            context: self.context.run(direction),
            _state: Running,
        }
    }

    pub fn jump(self) -> PlayerState<Jumping> {
        PlayerState {
            context: self.context.set_vertical_velocity(self.context.physics.jump_speed),
            _state: Jumping,
        }
    }
}

impl PlayerState<Running> {
    pub fn update(mut self) -> Self {
        self.context = self.context.update();
        self
    }

    pub fn run(self, direction: Direction) -> Self {
        PlayerState {
            context: self.context.run(direction),
            _state: Running,
        }
    }

    pub fn stop(self) -> PlayerState<Idle> {
        PlayerState {
            context: self.context.stop(),
            _state: Idle,
        }
    }

    pub fn jump(self) -> PlayerState<Jumping> {
        PlayerState {
            context: self.context.set_vertical_velocity(self.context.physics.jump_speed),
            _state: Jumping,
        }
    }
}

impl PlayerState<Jumping> {
    /// Returns an enum because a jump can:
    /// - End      (Done)
    /// - Continue (InProgress)
    pub fn update(mut self) -> IsJumping {
        self.context = self.context.update();
        if self.context.on_floor() && self.context.velocity.y >= 0.0 {
            IsJumping::Done(self.land())
        } else {
            IsJumping::InProgress(self)
        }
    }

    /// Steering in the air keeps the jump going.
    pub fn steer(self, direction: Option<Direction>) -> Self {
        let context = match direction {
            Some(direction) => self.context.run(direction),
            None => self.context.stop(),
        };
        PlayerState {
            context,
            _state: Jumping,
        }
    }

    pub fn land(self) -> PlayerState<Running> {
        PlayerState {
            context: self.context.set_vertical_velocity(0.0),
            _state: Running,
        }
    }
}

impl PlayerContext {
    /// One fixed step: gravity, integration, floor and world-edge resolution.
    pub fn update(mut self) -> Self {
        self.velocity.y += self.physics.gravity;
        self.position.x += self.velocity.x;
        self.position.y += self.velocity.y;

        if self.position.y > self.physics.floor {
            self.position.y = self.physics.floor;
            self.velocity.y = 0.0;
        }
        self.position.x = self.position.x.clamp(0.0, self.physics.world_width);
        self
    }

    pub fn on_floor(&self) -> bool {
        self.position.y >= self.physics.floor
    }

    fn with_position(mut self, position: Point) -> Self {
        self.position = Point {
            x: position.x.clamp(0.0, self.physics.world_width),
            y: position.y.min(self.physics.floor),
        };
        self.velocity = Point::default();
        self
    }

    fn run(mut self, direction: Direction) -> Self {
        self.velocity.x = direction.sign() * self.physics.run_speed * self.speed_multiplier;
        self.facing = direction;
        self
    }

    fn stop(mut self) -> Self {
        self.velocity.x = 0.0;
        self
    }

    fn set_vertical_velocity(mut self, y: f64) -> Self {
        self.velocity.y = y;
        self
    }
}
