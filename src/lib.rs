// ==================== Imports ====================
use crate::config::ProgressConfig;
use crate::engine::{BrowserAssets, GameLoop, LoopHandle, WallClock};
use crate::events::{EventBus, GameEvent, SubscriptionId, Topic};
use crate::game::{HanoiExplorer, ProgressSlot};
use crate::progress::{Position, ProgressStore};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use wasm_bindgen::prelude::*;

pub mod browser;
pub mod config;
pub mod dialogue;
pub mod engine;
pub mod events;
pub mod game;
pub mod landmark;
pub mod player;
pub mod progress;
pub mod puzzle;
pub mod scene;

// ==================== Host state ====================
enum GameSlot {
    Idle,
    /// `stop_game` arrived before the loop was up.
    Starting { cancelled: bool },
    Running(LoopHandle),
}

/// Everything the page talks to. One per page; the bus outlives games so
/// the page can subscribe before the first scene appears.
struct Host {
    bus: EventBus,
    game: GameSlot,
    // the store the current or last game was configured with
    progress: ProgressSlot,
    listeners: HashMap<u32, (Topic, SubscriptionId)>,
    next_listener: u32,
}

impl Default for Host {
    fn default() -> Self {
        Host {
            bus: EventBus::new(),
            game: GameSlot::Idle,
            progress: ProgressSlot::default(),
            listeners: HashMap::new(),
            next_listener: 0,
        }
    }
}

thread_local! {
    static HOST: RefCell<Host> = RefCell::new(Host::default());
}

// handlers may call back into the bridge, so the bus is cloned out and the
// borrow released before anything is published
fn bus() -> EventBus {
    HOST.with(|host| host.borrow().bus.clone())
}

fn to_js(event: &GameEvent) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(event).map_err(JsValue::from)
}

// ==================== Main Functions ====================
/// Main entry for Webassembly module
/// - installs the panic hook
/// - routes `log` output to the browser console
#[wasm_bindgen]
pub fn main_js() -> Result<(), JsValue> {
    // setup better panic messages for debugging
    console_error_panic_hook::set_once();
    if console_log::init_with_level(log::Level::Info).is_err() {
        log::debug!("logger was already installed");
    }
    Ok(())
}

/// Fetches config and landmarks, then runs the scene loop on the canvas.
/// Calling it while a game runs does nothing.
#[wasm_bindgen]
pub fn start_game() -> Result<(), JsValue> {
    let ready = HOST.with(|host| {
        let mut host = host.borrow_mut();
        if matches!(host.game, GameSlot::Idle) {
            host.game = GameSlot::Starting { cancelled: false };
            true
        } else {
            false
        }
    });
    if !ready {
        log::warn!("start_game: a game is already running");
        return Ok(());
    }

    let assets = BrowserAssets::default();
    let progress = HOST.with(|host| host.borrow().progress.clone());
    let game = HanoiExplorer::new(bus(), assets.clone(), progress);
    browser::spawn_local(async move {
        let started = GameLoop::start(game, assets.textures()).await;
        // stopping publishes, so it waits until the host is released
        let abandoned = HOST.with(|host| {
            let mut host = host.borrow_mut();
            let cancelled = matches!(host.game, GameSlot::Starting { cancelled: true });
            host.game = GameSlot::Idle;
            match started {
                Ok(handle) if cancelled => Some(handle),
                Ok(handle) => {
                    host.game = GameSlot::Running(handle);
                    None
                }
                Err(err) => {
                    log::error!("could not start the game: {:#}", err);
                    None
                }
            }
        });
        if let Some(handle) = abandoned {
            handle.stop();
        }
    });
    Ok(())
}

/// Stops the loop and tears every scene down before returning, so
/// `start_game` may follow right away.
#[wasm_bindgen]
pub fn stop_game() {
    let running = HOST.with(|host| {
        let mut host = host.borrow_mut();
        match std::mem::replace(&mut host.game, GameSlot::Idle) {
            GameSlot::Running(handle) => Some(handle),
            GameSlot::Starting { .. } => {
                host.game = GameSlot::Starting { cancelled: true };
                None
            }
            GameSlot::Idle => {
                log::debug!("stop_game: nothing running");
                None
            }
        }
    });
    if let Some(handle) = running {
        handle.stop();
    }
}

/// Calls `callback({ type, payload })` for every event named `name`.
/// Returns an id for [`off_game_event`].
#[wasm_bindgen]
pub fn on_game_event(name: &str, callback: js_sys::Function) -> Result<u32, JsValue> {
    let topic: Topic = name
        .parse()
        .map_err(|err: events::UnknownTopic| JsValue::from_str(&err.to_string()))?;
    let subscription = bus().subscribe(topic, move |event| {
        let delivered = to_js(event).and_then(|value| callback.call1(&JsValue::NULL, &value));
        if let Err(err) = delivered {
            log::warn!("{:?} listener failed: {:?}", topic, err);
        }
    });
    Ok(HOST.with(|host| {
        let mut host = host.borrow_mut();
        host.next_listener += 1;
        let id = host.next_listener;
        host.listeners.insert(id, (topic, subscription));
        id
    }))
}

/// Returns false for an id that is unknown or already removed.
#[wasm_bindgen]
pub fn off_game_event(id: u32) -> bool {
    let removed = HOST.with(|host| host.borrow_mut().listeners.remove(&id));
    match removed {
        Some((topic, subscription)) => bus().unsubscribe(topic, subscription),
        None => false,
    }
}

/// Injects a host command such as `{ type: "pause-game" }`. Events the game
/// itself produces are refused.
#[wasm_bindgen]
pub fn emit_game_event(event: JsValue) -> Result<(), JsValue> {
    let event: GameEvent = serde_wasm_bindgen::from_value(event).map_err(JsValue::from)?;
    if !event.is_host_command() {
        log::warn!("emit_game_event: {:?} is not a host command", event.topic());
        return Ok(());
    }
    bus().publish(event);
    Ok(())
}

/// Forgets the saved run, as the start screen does before a new game.
/// Uses the storage key the game was configured with; a running world
/// restarts from the defaults when it hears about it.
#[wasm_bindgen]
pub fn clear_progress() {
    let progress = HOST.with(|host| host.borrow().progress.clone());
    let configured = progress.borrow().clone();
    let store = configured.unwrap_or_else(|| {
        ProgressStore::new(
            Rc::new(browser::LocalStorage),
            Rc::new(WallClock),
            ProgressConfig::default().storage_key,
            Position::default(),
        )
    });
    store.reset();
    bus().publish(GameEvent::GameProgressCleared);
}
