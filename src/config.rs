//! Tunables loaded from `config.json`, falling back to the built-in values.
use crate::progress::Position;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("requiredVisits must be at least 1")]
    NoRequiredVisits,
    #[error("puzzle gridSize must be at least 2, got {0}")]
    GridTooSmall(usize),
    #[error("{0} must be positive")]
    NotPositive(&'static str),
    #[error("config is not valid JSON: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorldConfig {
    pub width: f64,
    pub height: f64,
    /// y of the player's feet when standing.
    pub floor: f64,
    pub gravity: f64,
    pub run_speed: f64,
    /// Negative: the origin is top left.
    pub jump_speed: f64,
    pub spawn: Position,
    /// World pixels per metre of displayed distance.
    pub distance_scale: f64,
    pub viewport_width: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        WorldConfig {
            width: 4000.0,
            height: 600.0,
            floor: 475.0,
            gravity: 1.0,
            run_speed: 3.0,
            jump_speed: -18.0,
            spawn: Position { x: 512.0, y: 475.0 },
            distance_scale: 10.0,
            viewport_width: 800.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProgressConfig {
    pub storage_key: String,
    pub autosave_interval_ms: f64,
    /// Distinct visits needed before the quiz unlocks.
    pub required_visits: usize,
    /// How long save and completion notices stay on screen.
    pub notice_ms: f64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        ProgressConfig {
            storage_key: "gameProgress".into(),
            autosave_interval_ms: 30_000.0,
            required_visits: 5,
            notice_ms: 2_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PuzzleConfig {
    pub grid_size: usize,
    pub shuffle_moves: usize,
    /// Pool used when a landmark has no puzzle image of its own.
    pub images: Vec<String>,
    pub tile_size: f64,
    pub gap: f64,
}

impl Default for PuzzleConfig {
    fn default() -> Self {
        PuzzleConfig {
            grid_size: 3,
            shuffle_moves: 1000,
            images: ["lotus", "flag", "hcm", "kt", "uni"]
                .iter()
                .map(|name| format!("assets/puzzle/{}.webp", name))
                .collect(),
            tile_size: 80.0,
            gap: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BoostConfig {
    pub speed_multiplier: f64,
    pub duration_ms: f64,
}

impl Default for BoostConfig {
    fn default() -> Self {
        BoostConfig {
            speed_multiplier: 1.5,
            duration_ms: 3_000.0,
        }
    }
}

/// `KeyboardEvent.code` values per logical action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Bindings {
    pub left: Vec<String>,
    pub right: Vec<String>,
    pub jump: Vec<String>,
    pub interact: Vec<String>,
    pub save: Vec<String>,
    pub reset: Vec<String>,
    /// One of these must be held for `reset` to fire.
    pub reset_modifier: Vec<String>,
    pub minimap: Vec<String>,
    pub pause: Vec<String>,
    pub back_to_map: Vec<String>,
    pub confirm: Vec<String>,
    pub dialogue_back: Vec<String>,
    pub puzzle_back: Vec<String>,
    pub puzzle_shuffle: Vec<String>,
    pub puzzle_up: Vec<String>,
    pub puzzle_down: Vec<String>,
    pub puzzle_left: Vec<String>,
    pub puzzle_right: Vec<String>,
}

fn codes(list: &[&str]) -> Vec<String> {
    list.iter().map(|code| code.to_string()).collect()
}

impl Default for Bindings {
    fn default() -> Self {
        Bindings {
            left: codes(&["ArrowLeft", "KeyA"]),
            right: codes(&["ArrowRight", "KeyD"]),
            jump: codes(&["ArrowUp", "KeyW"]),
            interact: codes(&["Space"]),
            save: codes(&["KeyS"]),
            reset: codes(&["KeyR"]),
            reset_modifier: codes(&["ShiftLeft", "ShiftRight"]),
            minimap: codes(&["KeyM"]),
            pause: codes(&["KeyP"]),
            back_to_map: codes(&["Escape"]),
            confirm: codes(&["Enter", "Space"]),
            dialogue_back: codes(&["Backspace"]),
            puzzle_back: codes(&["Escape"]),
            puzzle_shuffle: codes(&["KeyR"]),
            puzzle_up: codes(&["ArrowUp", "KeyW"]),
            puzzle_down: codes(&["ArrowDown", "KeyS"]),
            puzzle_left: codes(&["ArrowLeft", "KeyA"]),
            puzzle_right: codes(&["ArrowRight", "KeyD"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GameConfig {
    pub world: WorldConfig,
    pub progress: ProgressConfig,
    pub puzzle: PuzzleConfig,
    pub boost: BoostConfig,
    pub bindings: Bindings,
    /// Extra distance added to half a landmark's width for "nearby".
    pub interaction_margin: f64,
}

impl Default for GameConfig {
    fn default() -> Self {
        GameConfig {
            world: WorldConfig::default(),
            progress: ProgressConfig::default(),
            puzzle: PuzzleConfig::default(),
            boost: BoostConfig::default(),
            bindings: Bindings::default(),
            interaction_margin: 50.0,
        }
    }
}

impl GameConfig {
    pub const PATH: &'static str = "config.json";

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: GameConfig =
            serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.progress.required_visits == 0 {
            return Err(ConfigError::NoRequiredVisits);
        }
        if self.puzzle.grid_size < 2 {
            return Err(ConfigError::GridTooSmall(self.puzzle.grid_size));
        }
        let positive = [
            (self.progress.autosave_interval_ms, "autosaveIntervalMs"),
            (self.world.distance_scale, "distanceScale"),
            (self.world.run_speed, "runSpeed"),
            (self.world.width, "world width"),
            (self.puzzle.tile_size, "tileSize"),
        ];
        for (value, name) in positive {
            if !(value > 0.0) {
                return Err(ConfigError::NotPositive(name));
            }
        }
        Ok(())
    }

    /// The fetched config when it is usable, otherwise the defaults.
    pub fn or_default(fetched: anyhow::Result<GameConfig>) -> GameConfig {
        let checked = fetched.and_then(|config| {
            config.validate()?;
            Ok(config)
        });
        match checked {
            Ok(config) => config,
            Err(err) => {
                log::warn!("using default config: {:#}", err);
                GameConfig::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults_for_the_rest() {
        let config =
            GameConfig::from_json(r#"{"progress":{"requiredVisits":4},"interactionMargin":100}"#)
                .unwrap();
        assert_eq!(config.progress.required_visits, 4);
        assert_eq!(config.progress.storage_key, "gameProgress");
        assert_eq!(config.interaction_margin, 100.0);
        assert_eq!(config.puzzle.grid_size, 3);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        assert_eq!(
            GameConfig::from_json(r#"{"progress":{"requiredVisits":0}}"#),
            Err(ConfigError::NoRequiredVisits)
        );
    }

    #[test]
    fn tiny_grid_is_rejected() {
        let mut config = GameConfig::default();
        config.puzzle.grid_size = 1;
        assert_eq!(config.validate(), Err(ConfigError::GridTooSmall(1)));
    }

    #[test]
    fn failed_fetch_falls_back_to_defaults() {
        let config = GameConfig::or_default(Err(anyhow::anyhow!("404")));
        assert_eq!(config, GameConfig::default());
        assert_eq!(config.interaction_margin, 50.0);
    }
}
