//! Linear dialogue overlay. The cursor only moves within the script; the
//! last step's action runs once, when the player steps past the end.
use crate::engine::{Point, Rect, Renderer};
use crate::events::{EventBus, GameEvent};
use crate::scene::{SceneData, SceneName};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DialogueError {
    #[error("a dialogue needs at least one step")]
    Empty,
    #[error("step {0} carries an action but is not the last step")]
    ActionNotOnFinalStep(usize),
}

/// What the scene hosting a dialogue lets the final action do.
pub trait DialogueHost {
    fn bus(&self) -> &EventBus;
    fn change_scene(&mut self, scene: SceneName);
    fn launch_scene(&mut self, scene: SceneName, data: SceneData);
    fn move_player(&mut self, position: Point);
}

pub enum DialogueAction {
    SceneChange { scene: SceneName },
    SceneLaunch { scene: SceneName, data: SceneData },
    MovePlayer { x: f64, y: f64 },
    Custom(Box<dyn FnOnce(&mut dyn DialogueHost)>),
}

impl fmt::Debug for DialogueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialogueAction::SceneChange { scene } => write!(f, "SceneChange({:?})", scene),
            DialogueAction::SceneLaunch { scene, .. } => write!(f, "SceneLaunch({:?})", scene),
            DialogueAction::MovePlayer { x, y } => write!(f, "MovePlayer({}, {})", x, y),
            DialogueAction::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl DialogueAction {
    fn run(self, host: &mut dyn DialogueHost) {
        match self {
            DialogueAction::SceneChange { scene } => host.change_scene(scene),
            DialogueAction::SceneLaunch { scene, data } => host.launch_scene(scene, data),
            DialogueAction::MovePlayer { x, y } => host.move_player(Point { x, y }),
            DialogueAction::Custom(callback) => callback(host),
        }
    }
}

#[derive(Debug)]
pub struct DialogueStep {
    pub text: String,
    pub action: Option<DialogueAction>,
    /// Caption of the button that runs the action.
    pub action_label: Option<String>,
}

impl DialogueStep {
    pub fn say(text: impl Into<String>) -> Self {
        DialogueStep {
            text: text.into(),
            action: None,
            action_label: None,
        }
    }

    pub fn then(mut self, label: impl Into<String>, action: DialogueAction) -> Self {
        self.action = Some(action);
        self.action_label = Some(label.into());
        self
    }
}

/// Steps checked up front: at least one, and only the last may act.
#[derive(Debug)]
pub struct DialogueScript {
    steps: Vec<DialogueStep>,
}

impl DialogueScript {
    pub fn new(steps: Vec<DialogueStep>) -> Result<Self, DialogueError> {
        if steps.is_empty() {
            return Err(DialogueError::Empty);
        }
        let last = steps.len() - 1;
        if let Some(index) = steps[..last].iter().position(|step| step.action.is_some()) {
            return Err(DialogueError::ActionNotOnFinalStep(index));
        }
        Ok(DialogueScript { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

const PANEL: Rect = Rect {
    position: Point { x: 100.0, y: 200.0 },
    size: crate::engine::Size {
        width: 600.0,
        height: 200.0,
    },
};

const CONTINUE_BUTTON: Rect = Rect {
    position: Point { x: 440.0, y: 332.0 },
    size: crate::engine::Size {
        width: 120.0,
        height: 36.0,
    },
};

const BACK_BUTTON: Rect = Rect {
    position: Point { x: 260.0, y: 332.0 },
    size: crate::engine::Size {
        width: 80.0,
        height: 36.0,
    },
};

const CHARS_PER_LINE: usize = 56;

pub struct Dialogue {
    steps: Vec<DialogueStep>,
    index: usize,
    open: bool,
    on_complete: Option<Box<dyn FnOnce()>>,
}

impl Dialogue {
    /// Opens on the first step and announces `dialogue-started`.
    pub fn open(script: DialogueScript, bus: &EventBus) -> Self {
        bus.publish(GameEvent::DialogueStarted);
        Dialogue {
            steps: script.steps,
            index: 0,
            open: true,
            on_complete: None,
        }
    }

    /// Runs after the final action, only when the player finished the script.
    pub fn on_complete(mut self, callback: impl FnOnce() + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn text(&self) -> Option<&str> {
        self.steps.get(self.index).map(|step| step.text.as_str())
    }

    /// The back control is hidden, not merely inert, on the first step.
    pub fn can_go_back(&self) -> bool {
        self.open && self.index > 0
    }

    fn is_last(&self) -> bool {
        self.index + 1 >= self.steps.len()
    }

    pub fn continue_label(&self) -> &str {
        if !self.is_last() {
            return "Continue";
        }
        self.steps
            .get(self.index)
            .and_then(|step| step.action_label.as_deref())
            .unwrap_or("Finish")
    }

    /// Advances, or on the last step runs its action, closes, and calls the
    /// completion callback. Does nothing once closed.
    pub fn next(&mut self, host: &mut dyn DialogueHost) {
        if !self.open {
            return;
        }
        if !self.is_last() {
            self.index += 1;
            return;
        }
        if let Some(action) = self.steps.get_mut(self.index).and_then(|step| step.action.take()) {
            log::debug!("dialogue action {:?}", action);
            action.run(host);
        }
        self.close(host.bus());
        if let Some(callback) = self.on_complete.take() {
            callback();
        }
    }

    pub fn back(&mut self) {
        if self.can_go_back() {
            self.index -= 1;
        }
    }

    /// Closes without running the action or the completion callback. Safe
    /// to call any number of times.
    pub fn force_close(&mut self, bus: &EventBus) {
        if self.open {
            self.on_complete = None;
            self.close(bus);
        }
    }

    fn close(&mut self, bus: &EventBus) {
        self.open = false;
        bus.publish(GameEvent::DialogueEnded);
    }

    /// Maps a click onto the dialogue buttons.
    pub fn hit(&self, point: Point) -> Option<DialogueButton> {
        if CONTINUE_BUTTON.contains(point) {
            Some(DialogueButton::Continue)
        } else if self.can_go_back() && BACK_BUTTON.contains(point) {
            Some(DialogueButton::Back)
        } else {
            None
        }
    }

    pub fn draw(&self, renderer: &Renderer) {
        let Some(text) = self.text().filter(|_| self.open) else {
            return;
        };
        renderer.fill_rect(&PANEL, "rgba(0, 0, 0, 0.8)");
        renderer.stroke_rect(&PANEL, "rgba(255, 255, 255, 0.8)");
        for (line_number, line) in wrap(text, CHARS_PER_LINE).iter().enumerate() {
            let at = Point {
                x: PANEL.position.x + 40.0,
                y: PANEL.position.y + 45.0 + line_number as f64 * 24.0,
            };
            renderer.draw_text(line, at, "18px Arial", "#ffffff");
        }
        renderer.fill_rect(&CONTINUE_BUTTON, "#27ae60");
        let label_at = Point {
            x: CONTINUE_BUTTON.position.x + 14.0,
            y: CONTINUE_BUTTON.position.y + 24.0,
        };
        renderer.draw_text(self.continue_label(), label_at, "16px Arial", "#ffffff");
        if self.can_go_back() {
            renderer.fill_rect(&BACK_BUTTON, "#95a5a6");
            let back_at = Point {
                x: BACK_BUTTON.position.x + 18.0,
                y: BACK_BUTTON.position.y + 24.0,
            };
            renderer.draw_text("Back", back_at, "16px Arial", "#ffffff");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueButton {
    Continue,
    Back,
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Inbox, Topic};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[derive(Default)]
    struct Host {
        bus: EventBus,
        scenes: Vec<SceneName>,
        moved: Option<Point>,
    }

    impl DialogueHost for Host {
        fn bus(&self) -> &EventBus {
            &self.bus
        }

        fn change_scene(&mut self, scene: SceneName) {
            self.scenes.push(scene);
        }

        fn launch_scene(&mut self, scene: SceneName, _data: SceneData) {
            self.scenes.push(scene);
        }

        fn move_player(&mut self, position: Point) {
            self.moved = Some(position);
        }
    }

    fn three_steps(action: DialogueAction) -> DialogueScript {
        DialogueScript::new(vec![
            DialogueStep::say("Xin chào!"),
            DialogueStep::say("Hanoi is a thousand years old."),
            DialogueStep::say("Ready?").then("Go", action),
        ])
        .unwrap()
    }

    #[test]
    fn scripts_are_validated() {
        assert_eq!(DialogueScript::new(vec![]).unwrap_err(), DialogueError::Empty);
        let misplaced = DialogueScript::new(vec![
            DialogueStep::say("one").then("x", DialogueAction::MovePlayer { x: 0.0, y: 0.0 }),
            DialogueStep::say("two"),
        ]);
        assert_eq!(misplaced.unwrap_err(), DialogueError::ActionNotOnFinalStep(0));
    }

    #[test]
    fn back_at_first_step_is_disabled() {
        let mut host = Host::default();
        let mut dialogue = Dialogue::open(
            three_steps(DialogueAction::MovePlayer { x: 10.0, y: 20.0 }),
            &host.bus,
        );
        assert!(!dialogue.can_go_back());
        dialogue.back();
        assert_eq!(dialogue.index(), 0);
        assert!(host.moved.is_none());

        dialogue.next(&mut host);
        assert!(dialogue.can_go_back());
        dialogue.back();
        assert_eq!(dialogue.index(), 0);
    }

    #[test]
    fn final_action_runs_once_then_closes() {
        let mut host = Host::default();
        let inbox = Inbox::new();
        host.bus.subscribe(Topic::DialogueStarted, inbox.sender());
        host.bus.subscribe(Topic::DialogueEnded, inbox.sender());
        let finished = Rc::new(Cell::new(0));
        let counter = finished.clone();

        let mut dialogue = Dialogue::open(
            three_steps(DialogueAction::SceneChange {
                scene: SceneName::WorldMap,
            }),
            &host.bus,
        )
        .on_complete(move || counter.set(counter.get() + 1));

        assert_eq!(dialogue.continue_label(), "Continue");
        dialogue.next(&mut host);
        dialogue.next(&mut host);
        assert_eq!(dialogue.continue_label(), "Go");
        assert!(host.scenes.is_empty());

        dialogue.next(&mut host);
        dialogue.next(&mut host);
        dialogue.next(&mut host);

        assert_eq!(host.scenes, vec![SceneName::WorldMap]);
        assert_eq!(finished.get(), 1);
        assert!(!dialogue.is_open());
        assert_eq!(
            inbox.drain(),
            vec![GameEvent::DialogueStarted, GameEvent::DialogueEnded]
        );
    }

    #[test]
    fn custom_action_gets_the_host() {
        let mut host = Host::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        let mut dialogue = Dialogue::open(
            DialogueScript::new(vec![DialogueStep::say("Done").then(
                "Finish",
                DialogueAction::Custom(Box::new(move |host| {
                    host.move_player(Point { x: 1.0, y: 2.0 });
                    log.borrow_mut().push("custom");
                })),
            )])
            .unwrap(),
            &host.bus,
        );
        dialogue.next(&mut host);
        assert_eq!(*seen.borrow(), vec!["custom"]);
        assert_eq!(host.moved, Some(Point { x: 1.0, y: 2.0 }));
    }

    #[test]
    fn force_close_is_idempotent_and_skips_completion() {
        let mut host = Host::default();
        let inbox = Inbox::new();
        host.bus.subscribe(Topic::DialogueEnded, inbox.sender());
        let finished = Rc::new(Cell::new(false));
        let flag = finished.clone();
        let mut dialogue = Dialogue::open(
            three_steps(DialogueAction::MovePlayer { x: 1.0, y: 1.0 }),
            &host.bus,
        )
        .on_complete(move || flag.set(true));

        dialogue.force_close(&host.bus);
        dialogue.force_close(&host.bus);
        dialogue.next(&mut host);

        assert_eq!(inbox.drain(), vec![GameEvent::DialogueEnded]);
        assert!(!finished.get());
        assert!(host.moved.is_none());
    }

    #[test]
    fn clicks_hit_visible_buttons_only() {
        let mut host = Host::default();
        let mut dialogue = Dialogue::open(
            three_steps(DialogueAction::MovePlayer { x: 0.0, y: 0.0 }),
            &host.bus,
        );
        let back = Point { x: 270.0, y: 340.0 };
        assert_eq!(dialogue.hit(back), None);
        dialogue.next(&mut host);
        assert_eq!(dialogue.hit(back), Some(DialogueButton::Back));
        assert_eq!(
            dialogue.hit(Point { x: 450.0, y: 340.0 }),
            Some(DialogueButton::Continue)
        );
    }

    #[test]
    fn long_text_wraps_on_words() {
        let lines = wrap("one two three four", 9);
        assert_eq!(lines, vec!["one two", "three", "four"]);
    }
}
