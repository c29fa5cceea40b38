use crate::browser;
use anyhow::{anyhow, Error, Result};
// wasm is single threaded, so Rc<RefCell<_>> over Arc<Mutex<_>>
use async_trait::async_trait;
use futures::channel::oneshot::channel;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{CanvasRenderingContext2d, HtmlImageElement};

use self::input::InputState;

#[async_trait(?Send)]
pub trait Game {
    async fn initialize(&self) -> Result<Box<dyn Game>>;
    fn update(&mut self, input: &InputState);
    fn draw(&mut self, renderer: &Renderer);
    /// Last call the game receives; cancels timers and subscriptions.
    fn shutdown(&mut self);
}

// length of a frame in milliseconds
pub const FRAME_SIZE: f32 = 1.0 / 60.0 * 1000.0;

pub struct GameLoop {
    last_frame: f64,
    accumulated_delta: f32,
}

type SharedLoopClosure = Rc<RefCell<Option<browser::LoopClosure>>>;

#[derive(Default)]
struct LoopShared {
    stopped: Cell<bool>,
    game: RefCell<Option<Box<dyn Game>>>,
}

impl LoopShared {
    /// Hands the game its shutdown at most once. While a frame holds the
    /// game this does nothing and the frame finishes the job.
    fn shut_down(&self) {
        let game = match self.game.try_borrow_mut() {
            Ok(mut slot) => slot.take(),
            Err(_) => {
                log::debug!("frame in progress, shutdown deferred to its end");
                None
            }
        };
        if let Some(mut game) = game {
            game.shutdown();
        }
    }
}

/// Returned by [`GameLoop::start`]. Stopping shuts the game down before
/// `stop` returns; the next animation frame only releases the loop closure.
#[derive(Clone, Default)]
pub struct LoopHandle {
    shared: Rc<LoopShared>,
}

impl LoopHandle {
    pub fn new(game: Box<dyn Game>) -> Self {
        LoopHandle {
            shared: Rc::new(LoopShared {
                stopped: Cell::new(false),
                game: RefCell::new(Some(game)),
            }),
        }
    }

    pub fn stop(&self) {
        self.shared.stopped.set(true);
        self.shared.shut_down();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.get()
    }

    /// False once the game has received its shutdown.
    pub fn is_live(&self) -> bool {
        self.shared.game.borrow().is_some()
    }
}

impl GameLoop {
    pub async fn start(game: impl Game + 'static, textures: BrowserTextures) -> Result<LoopHandle> {
        let game = game.initialize().await?;
        let (mut receiver, listeners) = input::prepare_input()?;
        let mut listeners = Some(listeners);
        let mut input = InputState::default();
        let mut game_loop = GameLoop {
            last_frame: browser::now()?,
            accumulated_delta: 0.0,
        };
        let renderer = Renderer {
            context: browser::context()?,
            textures,
        };
        let handle = LoopHandle::new(game);
        let shared = handle.shared.clone();

        let f: SharedLoopClosure = Rc::new(RefCell::new(None));
        let g = f.clone();
        *g.borrow_mut() = Some(browser::create_raf_closure(move |perf: f64| {
            if !shared.stopped.get() {
                let mut slot = shared.game.borrow_mut();
                if let Some(game) = slot.as_mut() {
                    input::process_input(&mut input, &mut receiver);
                    game_loop.accumulated_delta += (perf - game_loop.last_frame) as f32;
                    while game_loop.accumulated_delta > FRAME_SIZE {
                        game.update(&input);
                        // edge triggers belong to the first fixed step only
                        input.end_frame();
                        game_loop.accumulated_delta -= FRAME_SIZE;
                    }
                    game_loop.last_frame = perf;
                    game.draw(&renderer);
                }
            }
            if shared.stopped.get() {
                // no-op unless the stop arrived mid-frame
                shared.shut_down();
                // dropping the listeners removes them from the window
                listeners.take();
                // the closure cannot drop itself while running
                let cleanup = f.clone();
                browser::spawn_local(async move {
                    cleanup.borrow_mut().take();
                });
                return;
            }
            if let Some(callback) = f.borrow().as_ref() {
                if let Err(err) = browser::request_animation_frame(callback) {
                    log::error!("game loop stalled: {:#}", err);
                }
            }
        }));

        browser::request_animation_frame(
            g.borrow()
                .as_ref()
                .ok_or_else(|| anyhow!("GameLoop: Loop is None"))?,
        )?;

        Ok(handle)
    }
}

// ==================== Geometry ====================
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Rect {
    pub position: Point,
    pub size: Size,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Rect {
            position: Point { x, y },
            size: Size { width, height },
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.position.x
            && point.x < self.position.x + self.size.width
            && point.y >= self.position.y
            && point.y < self.position.y + self.size.height
    }
}

/// `0x8B4513` -> `"#8b4513"`
pub fn css_color(rgb: u32) -> String {
    format!("#{:06x}", rgb & 0x00ff_ffff)
}

// ==================== Time ====================
/// Wall-clock milliseconds. Injected so saves and timers can be replayed.
pub trait Clock {
    fn now(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WallClock;

impl Clock for WallClock {
    #[cfg(target_arch = "wasm32")]
    fn now(&self) -> f64 {
        js_sys::Date::now()
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn now(&self) -> f64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs_f64() * 1000.0)
            .unwrap_or_default()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        ManualClock {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn advance(&self, ms: f64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now.get()
    }
}

// ==================== Textures ====================
/// Opaque id of one scene instantiation; owns the textures it loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

#[derive(Debug, Default)]
pub struct InstanceIds {
    next: u64,
}

impl InstanceIds {
    pub fn next_id(&mut self) -> InstanceId {
        self.next += 1;
        InstanceId(self.next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle {
    index: u32,
    generation: u32,
}

struct Slot<T> {
    generation: u32,
    entry: Option<(InstanceId, T)>,
}

/// Generational arena of textures namespaced by owner. Releasing an owner
/// frees all of its slots at once; stale handles resolve to nothing.
pub struct TextureArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for TextureArena<T> {
    fn default() -> Self {
        TextureArena {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> TextureArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, owner: InstanceId, texture: T) -> TextureHandle {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation += 1;
                slot.entry = Some((owner, texture));
                TextureHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some((owner, texture)),
                });
                TextureHandle {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    pub fn get(&self, handle: TextureHandle) -> Option<&T> {
        self.slot(handle).map(|(_, texture)| texture)
    }

    pub fn owner_of(&self, handle: TextureHandle) -> Option<InstanceId> {
        self.slot(handle).map(|(owner, _)| *owner)
    }

    fn slot(&self, handle: TextureHandle) -> Option<&(InstanceId, T)> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    /// Returns how many textures were freed.
    pub fn release(&mut self, owner: InstanceId) -> usize {
        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if matches!(slot.entry, Some((slot_owner, _)) if slot_owner == owner) {
                slot.entry = None;
                self.free.push(index as u32);
                freed += 1;
            }
        }
        freed
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureStatus {
    Pending,
    Ready(TextureHandle),
    Failed,
}

/// Result slot of an asynchronous texture load, polled once per frame.
#[derive(Debug, Clone)]
pub struct PendingTexture {
    status: Rc<Cell<TextureStatus>>,
}

impl Default for PendingTexture {
    fn default() -> Self {
        PendingTexture {
            status: Rc::new(Cell::new(TextureStatus::Pending)),
        }
    }
}

impl PendingTexture {
    pub fn resolved(status: TextureStatus) -> Self {
        let pending = Self::default();
        pending.status.set(status);
        pending
    }

    pub fn settle(&self, status: TextureStatus) {
        self.status.set(status);
    }

    pub fn status(&self) -> TextureStatus {
        self.status.get()
    }
}

/// Asset loading capability handed to scenes.
pub trait Assets {
    fn load_texture(&self, owner: InstanceId, path: &str) -> PendingTexture;
    fn release(&self, owner: InstanceId);
}

pub type BrowserTextures = Rc<RefCell<TextureArena<HtmlImageElement>>>;

/// Loads images through `<img>` elements into the shared arena.
#[derive(Clone, Default)]
pub struct BrowserAssets {
    textures: BrowserTextures,
    live: Rc<RefCell<HashSet<InstanceId>>>,
}

impl BrowserAssets {
    pub fn textures(&self) -> BrowserTextures {
        self.textures.clone()
    }
}

impl Assets for BrowserAssets {
    fn load_texture(&self, owner: InstanceId, path: &str) -> PendingTexture {
        let pending = PendingTexture::default();
        self.live.borrow_mut().insert(owner);
        let textures = self.textures.clone();
        let live = self.live.clone();
        let slot = pending.clone();
        let path = path.to_string();
        browser::spawn_local(async move {
            match load_image(&path).await {
                // an owner torn down mid-load must not get a texture back
                Ok(image) if live.borrow().contains(&owner) => {
                    let handle = textures.borrow_mut().insert(owner, image);
                    slot.settle(TextureStatus::Ready(handle));
                }
                Ok(_) => log::debug!("dropping {} loaded after its owner left", path),
                Err(err) => {
                    log::warn!("texture {} unavailable: {:#}", path, err);
                    slot.settle(TextureStatus::Failed);
                }
            }
        });
        pending
    }

    fn release(&self, owner: InstanceId) {
        self.live.borrow_mut().remove(&owner);
        let freed = self.textures.borrow_mut().release(owner);
        log::debug!("released {} textures of {:?}", freed, owner);
    }
}

/// Resolves loads immediately; paths listed as missing fail. Used off-browser.
#[derive(Clone, Default)]
pub struct MemoryAssets {
    textures: Rc<RefCell<TextureArena<String>>>,
    missing: Rc<RefCell<HashSet<String>>>,
}

impl MemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_missing(&self, path: &str) {
        self.missing.borrow_mut().insert(path.to_string());
    }

    pub fn path_of(&self, handle: TextureHandle) -> Option<String> {
        self.textures.borrow().get(handle).cloned()
    }

    pub fn loaded(&self) -> usize {
        self.textures.borrow().len()
    }
}

impl Assets for MemoryAssets {
    fn load_texture(&self, owner: InstanceId, path: &str) -> PendingTexture {
        if self.missing.borrow().contains(path) {
            return PendingTexture::resolved(TextureStatus::Failed);
        }
        let handle = self.textures.borrow_mut().insert(owner, path.to_string());
        PendingTexture::resolved(TextureStatus::Ready(handle))
    }

    fn release(&self, owner: InstanceId) {
        self.textures.borrow_mut().release(owner);
    }
}

// ==================== Rendering ====================
pub struct Renderer {
    context: CanvasRenderingContext2d,
    textures: BrowserTextures,
}

impl Renderer {
    pub fn clear(&self, rect: &Rect) {
        self.context.clear_rect(
            rect.position.x,
            rect.position.y,
            rect.size.width,
            rect.size.height,
        );
    }

    pub fn fill_rect(&self, rect: &Rect, color: &str) {
        self.context.set_fill_style_str(color);
        self.context.fill_rect(
            rect.position.x,
            rect.position.y,
            rect.size.width,
            rect.size.height,
        );
    }

    pub fn stroke_rect(&self, rect: &Rect, color: &str) {
        self.context.set_stroke_style_str(color);
        self.context.stroke_rect(
            rect.position.x,
            rect.position.y,
            rect.size.width,
            rect.size.height,
        );
    }

    pub fn draw_text(&self, text: &str, location: Point, font: &str, color: &str) {
        self.context.set_font(font);
        self.context.set_fill_style_str(color);
        if let Err(err) = self.context.fill_text(text, location.x, location.y) {
            log::warn!("could not draw text {:?}: {:?}", text, err);
        }
    }

    pub fn texture_size(&self, handle: TextureHandle) -> Option<Size> {
        self.textures.borrow().get(handle).map(|image| Size {
            width: image.natural_width() as f64,
            height: image.natural_height() as f64,
        })
    }

    /// Draws `frame` of the texture (the whole image when `None`) into
    /// `destination`. Returns false when the handle no longer resolves.
    pub fn draw_texture(
        &self,
        handle: TextureHandle,
        frame: Option<&Rect>,
        destination: &Rect,
    ) -> bool {
        let textures = self.textures.borrow();
        let Some(image) = textures.get(handle) else {
            return false;
        };
        let frame = frame.copied().unwrap_or_else(|| {
            Rect::new(
                0.0,
                0.0,
                image.natural_width() as f64,
                image.natural_height() as f64,
            )
        });
        self.draw_image(image, &frame, destination);
        true
    }

    pub fn draw_image(&self, image: &HtmlImageElement, frame: &Rect, destination: &Rect) {
        if let Err(err) = self
            .context
            .draw_image_with_html_image_element_and_sw_and_sh_and_dx_and_dy_and_dw_and_dh(
                image,
                frame.position.x,
                frame.position.y,
                frame.size.width,
                frame.size.height,
                destination.position.x,
                destination.position.y,
                destination.size.width,
                destination.size.height,
            )
        {
            log::warn!("draw_image failed: {:?}", err);
        }
    }
}

/// Asynchronously load an image from a given source path
/// # Arguments
/// * `source` - string slice to path/url
/// # Returns
/// * `Ok(HtmlImageElement)` - on load success
/// * `Err` - on load fail
pub async fn load_image(source: &str) -> Result<HtmlImageElement> {
    let image = browser::create_html_image_element()?;
    let (tx, rx) = channel::<Result<(), Error>>();
    let success_tx = Rc::new(RefCell::new(Some(tx)));
    let error_tx = success_tx.clone();

    let success_callback = browser::closure_once(move || {
        if let Some(tx) = success_tx.borrow_mut().take() {
            let _ = tx.send(Ok(()));
        }
    });

    let error_callback = browser::closure_once(move |err: JsValue| {
        if let Some(tx) = error_tx.borrow_mut().take() {
            let _ = tx.send(Err(anyhow!("Error loading image {:#?}", err)));
        }
    });

    image.set_onload(Some(success_callback.as_ref().unchecked_ref()));
    image.set_onerror(Some(error_callback.as_ref().unchecked_ref()));
    image.set_src(source);

    // keep callback alive until image is loaded or errors
    success_callback.forget();
    error_callback.forget();

    // Result<Result<(), Error>, oneshot::Canceled>
    // - first ? yields the channel result
    // - second ? yields the image load result
    rx.await??;

    Ok(image)
}

pub mod input {
    use super::Point;
    use crate::browser;
    use anyhow::{anyhow, Result};
    use futures::channel::mpsc::{unbounded, UnboundedReceiver};
    use std::collections::HashSet;
    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::JsCast;
    use web_sys::{HtmlCanvasElement, KeyboardEvent, MouseEvent, Window};

    pub enum InputMessage {
        KeyDown(String),
        KeyUp(String),
        PointerDown(Point),
    }

    /// Keys held down (level) plus keys that went down since the last
    /// fixed step (edge). Holding a key auto-repeats keydown in the browser;
    /// only the first one counts as an edge.
    #[derive(Debug, Default, Clone)]
    pub struct KeyState {
        pressed: HashSet<String>,
        just_pressed: HashSet<String>,
    }

    impl KeyState {
        pub fn is_pressed(&self, code: &str) -> bool {
            self.pressed.contains(code)
        }

        pub fn was_just_pressed(&self, code: &str) -> bool {
            self.just_pressed.contains(code)
        }

        pub fn any_pressed(&self, codes: &[String]) -> bool {
            codes.iter().any(|code| self.is_pressed(code))
        }

        pub fn any_just_pressed(&self, codes: &[String]) -> bool {
            codes.iter().any(|code| self.was_just_pressed(code))
        }

        pub fn set_pressed(&mut self, code: &str) {
            if self.pressed.insert(code.to_string()) {
                self.just_pressed.insert(code.to_string());
            }
        }

        pub fn set_released(&mut self, code: &str) {
            self.pressed.remove(code);
        }
    }

    #[derive(Debug, Default, Clone)]
    pub struct InputState {
        pub keys: KeyState,
        /// Canvas-space pointer presses since the last fixed step.
        pub clicks: Vec<Point>,
    }

    impl InputState {
        pub fn apply(&mut self, message: InputMessage) {
            match message {
                InputMessage::KeyDown(code) => self.keys.set_pressed(&code),
                InputMessage::KeyUp(code) => self.keys.set_released(&code),
                InputMessage::PointerDown(point) => self.clicks.push(point),
            }
        }

        pub fn end_frame(&mut self) {
            self.keys.just_pressed.clear();
            self.clicks.clear();
        }
    }

    /// Owns the DOM listeners; dropping it detaches them.
    pub struct InputListeners {
        window: Window,
        canvas: HtmlCanvasElement,
        keydown: Closure<dyn FnMut(KeyboardEvent)>,
        keyup: Closure<dyn FnMut(KeyboardEvent)>,
        pointer: Closure<dyn FnMut(MouseEvent)>,
    }

    impl Drop for InputListeners {
        fn drop(&mut self) {
            // registration order was keydown, keyup, mousedown
            let detached = [
                ("mousedown", self.canvas.remove_event_listener_with_callback(
                    "mousedown",
                    self.pointer.as_ref().unchecked_ref(),
                )),
                ("keyup", self.window.remove_event_listener_with_callback(
                    "keyup",
                    self.keyup.as_ref().unchecked_ref(),
                )),
                ("keydown", self.window.remove_event_listener_with_callback(
                    "keydown",
                    self.keydown.as_ref().unchecked_ref(),
                )),
            ];
            for (kind, result) in detached {
                if let Err(err) = result {
                    log::warn!("could not detach {} listener: {:?}", kind, err);
                }
            }
        }
    }

    pub fn prepare_input() -> Result<(UnboundedReceiver<InputMessage>, InputListeners)> {
        let (sender, receiver) = unbounded();
        let window = browser::window()?;
        let canvas = browser::canvas()?;

        let keydown_sender = sender.clone();
        let keydown = browser::closure_wrap(Box::new(move |event: KeyboardEvent| {
            let _ = keydown_sender.unbounded_send(InputMessage::KeyDown(event.code()));
        }) as Box<dyn FnMut(KeyboardEvent)>);

        let keyup_sender = sender.clone();
        let keyup = browser::closure_wrap(Box::new(move |event: KeyboardEvent| {
            let _ = keyup_sender.unbounded_send(InputMessage::KeyUp(event.code()));
        }) as Box<dyn FnMut(KeyboardEvent)>);

        let target = canvas.clone();
        let pointer = browser::closure_wrap(Box::new(move |event: MouseEvent| {
            // canvas may be scaled by CSS
            let bounds = target.get_bounding_client_rect();
            let scale_x = target.width() as f64 / bounds.width().max(1.0);
            let scale_y = target.height() as f64 / bounds.height().max(1.0);
            let _ = sender.unbounded_send(InputMessage::PointerDown(Point {
                x: event.offset_x() as f64 * scale_x,
                y: event.offset_y() as f64 * scale_y,
            }));
        }) as Box<dyn FnMut(MouseEvent)>);

        window
            .add_event_listener_with_callback("keydown", keydown.as_ref().unchecked_ref())
            .map_err(|err| anyhow!("Could not listen to keydown {:#?}", err))?;
        window
            .add_event_listener_with_callback("keyup", keyup.as_ref().unchecked_ref())
            .map_err(|err| anyhow!("Could not listen to keyup {:#?}", err))?;
        canvas
            .add_event_listener_with_callback("mousedown", pointer.as_ref().unchecked_ref())
            .map_err(|err| anyhow!("Could not listen to mousedown {:#?}", err))?;

        Ok((
            receiver,
            InputListeners {
                window,
                canvas,
                keydown,
                keyup,
                pointer,
            },
        ))
    }

    pub fn process_input(state: &mut InputState, receiver: &mut UnboundedReceiver<InputMessage>) {
        // Err(_) : nothing queued, Ok(None) : sender gone
        while let Ok(Some(message)) = receiver.try_next() {
            state.apply(message);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn held_key_is_an_edge_only_once() {
            let mut input = InputState::default();
            input.apply(InputMessage::KeyDown("Space".into()));
            assert!(input.keys.was_just_pressed("Space"));
            input.end_frame();

            // browser auto-repeat
            input.apply(InputMessage::KeyDown("Space".into()));
            assert!(input.keys.is_pressed("Space"));
            assert!(!input.keys.was_just_pressed("Space"));

            input.apply(InputMessage::KeyUp("Space".into()));
            input.apply(InputMessage::KeyDown("Space".into()));
            assert!(input.keys.was_just_pressed("Space"));
        }

        #[test]
        fn clicks_last_one_step() {
            let mut input = InputState::default();
            input.apply(InputMessage::PointerDown(Point { x: 1.0, y: 2.0 }));
            assert_eq!(input.clicks.len(), 1);
            input.end_frame();
            assert!(input.clicks.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counted {
        shutdowns: Rc<Cell<u32>>,
    }

    #[async_trait(?Send)]
    impl Game for Counted {
        async fn initialize(&self) -> Result<Box<dyn Game>> {
            Err(anyhow!("already initialized"))
        }

        fn update(&mut self, _input: &InputState) {}

        fn draw(&mut self, _renderer: &Renderer) {}

        fn shutdown(&mut self) {
            self.shutdowns.set(self.shutdowns.get() + 1);
        }
    }

    fn counted(shutdowns: &Rc<Cell<u32>>) -> Box<dyn Game> {
        Box::new(Counted {
            shutdowns: shutdowns.clone(),
        })
    }

    #[test]
    fn stop_shuts_the_game_down_before_returning() {
        let shutdowns = Rc::new(Cell::new(0));
        let handle = LoopHandle::new(counted(&shutdowns));

        handle.stop();
        assert_eq!(shutdowns.get(), 1);
        assert!(handle.is_stopped());
        assert!(!handle.is_live());

        // a restart right away sees the old game already gone
        let next = LoopHandle::new(counted(&shutdowns));
        handle.stop();
        assert_eq!(shutdowns.get(), 1);
        assert!(next.is_live());
    }

    #[test]
    fn stop_during_a_frame_waits_for_the_frame() {
        let shutdowns = Rc::new(Cell::new(0));
        let handle = LoopHandle::new(counted(&shutdowns));
        {
            // what a frame holds while it updates the game
            let _frame = handle.shared.game.borrow_mut();
            handle.stop();
            assert_eq!(shutdowns.get(), 0);
            assert!(handle.is_stopped());
        }
        // the frame's own check after it lets go
        handle.shared.shut_down();
        assert_eq!(shutdowns.get(), 1);
        assert!(!handle.is_live());
    }

    #[test]
    fn arena_release_is_scoped_to_owner() {
        let mut ids = InstanceIds::default();
        let (first, second) = (ids.next_id(), ids.next_id());
        let mut arena = TextureArena::new();
        let a = arena.insert(first, "tile-a");
        let b = arena.insert(second, "tile-b");

        assert_eq!(arena.release(first), 1);

        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"tile-b"));
        assert_eq!(arena.owner_of(b), Some(second));
    }

    #[test]
    fn reused_slot_does_not_answer_stale_handle() {
        let mut ids = InstanceIds::default();
        let (first, second) = (ids.next_id(), ids.next_id());
        let mut arena = TextureArena::new();
        let stale = arena.insert(first, 1);
        arena.release(first);
        let fresh = arena.insert(second, 2);

        assert_eq!(arena.get(stale), None);
        assert_eq!(arena.get(fresh), Some(&2));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn memory_assets_fail_missing_paths() {
        let mut ids = InstanceIds::default();
        let owner = ids.next_id();
        let assets = MemoryAssets::new();
        assets.mark_missing("gone.webp");

        assert_eq!(
            assets.load_texture(owner, "gone.webp").status(),
            TextureStatus::Failed
        );
        let TextureStatus::Ready(handle) = assets.load_texture(owner, "uni.webp").status() else {
            panic!("expected a texture");
        };
        assert_eq!(assets.path_of(handle).as_deref(), Some("uni.webp"));
        assets.release(owner);
        assert_eq!(assets.loaded(), 0);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(1_000.0);
        let view = clock.clone();
        clock.advance(250.0);
        assert_eq!(view.now(), 1_250.0);
    }

    #[test]
    fn rect_contains_is_half_open() {
        let rect = Rect::new(10.0, 10.0, 20.0, 20.0);
        assert!(rect.contains(Point { x: 10.0, y: 29.9 }));
        assert!(!rect.contains(Point { x: 30.0, y: 15.0 }));
    }

    #[test]
    fn colors_render_as_css_hex() {
        assert_eq!(css_color(0x8B4513), "#8b4513");
        assert_eq!(css_color(0x000000), "#000000");
    }
}
