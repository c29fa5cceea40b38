use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

const BUILTIN_LANDMARKS: &str = include_str!("../static/landmarks.json");

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandmarkId(String);

impl LandmarkId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LandmarkId {
    fn from(id: &str) -> Self {
        LandmarkId(id.to_string())
    }
}

impl fmt::Display for LandmarkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LandmarkDefinition {
    pub id: LandmarkId,
    pub name: String,
    pub description: String,
    pub history: String,
    /// Left edge in world coordinates.
    pub x: f64,
    pub width: f64,
    pub height: f64,
    /// 0xRRGGBB, used for the placeholder when the sprite is missing.
    pub color: u32,
    pub year: String,
    #[serde(rename = "sprite", default, skip_serializing_if = "Option::is_none")]
    pub sprite_ref: Option<String>,
    #[serde(rename = "puzzle", default, skip_serializing_if = "Option::is_none")]
    pub puzzle_image_ref: Option<String>,
}

impl LandmarkDefinition {
    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    pub fn interaction_radius(&self, margin: f64) -> f64 {
        self.width / 2.0 + margin
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LandmarkError {
    #[error("landmark id {0:?} is defined more than once")]
    DuplicateId(LandmarkId),
    #[error("landmark {0:?} needs a positive width and height")]
    InvalidGeometry(LandmarkId),
    #[error("no landmarks defined")]
    Empty,
    #[error("landmark data is not valid JSON: {0}")]
    Parse(String),
}

/// Validated landmarks ordered left to right. Ids are unique.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    landmarks: Vec<LandmarkDefinition>,
}

impl LandmarkSet {
    pub fn new(mut landmarks: Vec<LandmarkDefinition>) -> Result<Self, LandmarkError> {
        if landmarks.is_empty() {
            return Err(LandmarkError::Empty);
        }
        let mut seen = HashSet::new();
        for landmark in &landmarks {
            if !seen.insert(landmark.id.clone()) {
                return Err(LandmarkError::DuplicateId(landmark.id.clone()));
            }
            if !(landmark.width > 0.0 && landmark.height > 0.0) {
                return Err(LandmarkError::InvalidGeometry(landmark.id.clone()));
            }
        }
        landmarks.sort_by(|a, b| a.x.total_cmp(&b.x));
        Ok(LandmarkSet { landmarks })
    }

    pub fn from_json(json: &str) -> Result<Self, LandmarkError> {
        let landmarks = serde_json::from_str::<Vec<LandmarkDefinition>>(json)
            .map_err(|err| LandmarkError::Parse(err.to_string()))?;
        Self::new(landmarks)
    }

    /// The five Hanoi landmarks shipped with the game.
    pub fn builtin() -> Result<Self, LandmarkError> {
        Self::from_json(BUILTIN_LANDMARKS)
    }

    pub fn get(&self, id: &LandmarkId) -> Option<&LandmarkDefinition> {
        self.landmarks.iter().find(|landmark| &landmark.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LandmarkDefinition> {
        self.landmarks.iter()
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    /// Closest landmark whose interaction radius contains `player_x`.
    pub fn nearest_in_range(&self, player_x: f64, margin: f64) -> Option<&LandmarkDefinition> {
        self.landmarks
            .iter()
            .map(|landmark| ((player_x - landmark.center_x()).abs(), landmark))
            .filter(|(distance, landmark)| *distance < landmark.interaction_radius(margin))
            .min_by(|(a, _), (b, _)| a.total_cmp(b))
            .map(|(_, landmark)| landmark)
    }
}

/// What changed since the previous frame. Moving straight from one
/// landmark to another yields both halves.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProximityChange {
    pub left: Option<LandmarkId>,
    pub entered: Option<LandmarkId>,
}

impl ProximityChange {
    pub fn is_empty(&self) -> bool {
        self.left.is_none() && self.entered.is_none()
    }
}

/// Edge detector over the per-frame nearest landmark.
#[derive(Debug, Default, Clone)]
pub struct ProximityTracker {
    current: Option<LandmarkId>,
}

impl ProximityTracker {
    pub fn current(&self) -> Option<&LandmarkId> {
        self.current.as_ref()
    }

    pub fn update(&mut self, nearest: Option<&LandmarkId>) -> ProximityChange {
        if self.current.as_ref() == nearest {
            return ProximityChange::default();
        }
        let change = ProximityChange {
            left: self.current.take(),
            entered: nearest.cloned(),
        };
        self.current = nearest.cloned();
        change
    }

    pub fn reset(&mut self) -> Option<LandmarkId> {
        self.current.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landmark(id: &str, x: f64) -> LandmarkDefinition {
        LandmarkDefinition {
            id: LandmarkId::from(id),
            name: id.to_string(),
            description: String::new(),
            history: String::new(),
            x,
            width: 120.0,
            height: 100.0,
            color: 0x8B4513,
            year: "1070 AD".into(),
            sprite_ref: None,
            puzzle_image_ref: None,
        }
    }

    #[test]
    fn builtin_data_is_valid_and_ordered() {
        let set = LandmarkSet::builtin().unwrap();
        assert_eq!(set.len(), 5);
        let xs: Vec<f64> = set.iter().map(|landmark| landmark.x).collect();
        assert!(xs.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(set.get(&LandmarkId::from("temple-literature")).is_some());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let result = LandmarkSet::new(vec![
            landmark("long-bien-bridge", 2200.0),
            landmark("long-bien-bridge", 3400.0),
        ]);
        assert_eq!(
            result,
            Err(LandmarkError::DuplicateId(LandmarkId::from("long-bien-bridge")))
        );
    }

    #[test]
    fn empty_and_degenerate_sets_are_rejected() {
        assert_eq!(LandmarkSet::new(vec![]), Err(LandmarkError::Empty));
        let mut flat = landmark("flat", 0.0);
        flat.height = 0.0;
        assert!(matches!(
            LandmarkSet::new(vec![flat]),
            Err(LandmarkError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn sprite_and_puzzle_are_optional_in_json() {
        let set = LandmarkSet::from_json(
            r#"[{"id":"a","name":"A","description":"","history":"","x":5,
                 "width":10,"height":10,"color":0,"year":"1900"}]"#,
        )
        .unwrap();
        let only = set.iter().next().unwrap();
        assert_eq!(only.sprite_ref, None);
        assert_eq!(only.puzzle_image_ref, None);
    }

    #[test]
    fn nearest_landmark_respects_radius() {
        let set = LandmarkSet::new(vec![landmark("a", 800.0), landmark("b", 1500.0)]).unwrap();
        // centre 860, radius 60 + 50
        assert_eq!(set.nearest_in_range(860.0, 50.0).map(|l| l.id.as_str()), Some("a"));
        assert_eq!(set.nearest_in_range(969.0, 50.0).map(|l| l.id.as_str()), Some("a"));
        assert!(set.nearest_in_range(970.0, 50.0).is_none());
    }

    #[test]
    fn tracker_fires_only_on_change() {
        let mut tracker = ProximityTracker::default();
        let a = LandmarkId::from("a");
        let b = LandmarkId::from("b");

        assert_eq!(tracker.update(Some(&a)).entered, Some(a.clone()));
        assert!(tracker.update(Some(&a)).is_empty());

        let switch = tracker.update(Some(&b));
        assert_eq!(switch.left, Some(a));
        assert_eq!(switch.entered, Some(b.clone()));

        assert_eq!(tracker.update(None).left, Some(b));
        assert!(tracker.update(None).is_empty());
    }
}
