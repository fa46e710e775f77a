//! Replays viewer clicks and key presses onto a [`Surface`].
//!
//! Calls return immediately; a per-app worker task applies the events
//! in submission order. Callers check control ownership first.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::input::surface::{Element, InputEvent, MouseButton, Surface, key_code_for_char};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputCommand {
    Click { x: i32, y: i32 },
    Press(char),
}

// ── RemoteInputInjector ──────────────────────────────────────────

/// Fire-and-forget input relay for one app.
///
/// The worker stops once the injector is dropped.
pub struct RemoteInputInjector {
    tx: mpsc::UnboundedSender<InputCommand>,
    submitted: AtomicU64,
}

impl RemoteInputInjector {
    pub fn new(app_id: &str, surface: Arc<dyn Surface>, handle: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let app = app_id.to_string();
        handle.spawn(async move {
            while let Some(command) = rx.recv().await {
                trace!(app = %app, ?command, "injecting input");
                match command {
                    InputCommand::Click { x, y } => apply_click(surface.as_ref(), x, y),
                    InputCommand::Press(ch) => apply_press(surface.as_ref(), ch),
                }
            }
            debug!(app = %app, "input worker stopped");
        });
        Self {
            tx,
            submitted: AtomicU64::new(0),
        }
    }

    /// Queue a click at surface coordinates.
    pub fn click(&self, x: i32, y: i32) {
        self.submit(InputCommand::Click { x, y });
    }

    /// Queue a single-character key press.
    pub fn press(&self, key: char) {
        self.submit(InputCommand::Press(key));
    }

    /// Commands accepted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    fn submit(&self, command: InputCommand) {
        if self.tx.send(command).is_err() {
            debug!(?command, "input worker gone; event dropped");
            return;
        }
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }
}

// ── Event synthesis ──────────────────────────────────────────────

/// Press, release, click on the deepest element under the point.
pub fn apply_click(surface: &dyn Surface, x: i32, y: i32) {
    let target = surface.element_at(x, y).unwrap_or(Element::root());
    let (lx, ly) = target.to_local(x, y);
    let button = MouseButton::Primary;
    for event in [
        InputEvent::MousePressed { x: lx, y: ly, button },
        InputEvent::MouseReleased { x: lx, y: ly, button },
        InputEvent::MouseClicked { x: lx, y: ly, button },
    ] {
        surface.dispatch(target.id, event);
    }
}

/// Pressed, typed, released on the focused element.
pub fn apply_press(surface: &dyn Surface, ch: char) {
    let target = surface.focused().unwrap_or(Element::root());
    let code = key_code_for_char(ch);
    for event in [
        InputEvent::KeyPressed { code, ch },
        InputEvent::KeyTyped { ch },
        InputEvent::KeyReleased { code, ch },
    ] {
        surface.dispatch(target.id, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VistreamError;
    use crate::input::surface::ElementId;
    use crate::media::RawFrame;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// One button at (10,10)-(50,30); focus configurable.
    #[derive(Default)]
    struct FakeSurface {
        focus: Option<Element>,
        events: Mutex<Vec<(ElementId, InputEvent)>>,
    }

    const BUTTON: Element = Element {
        id: 1,
        origin_x: 10,
        origin_y: 10,
    };

    impl Surface for FakeSurface {
        fn size(&self) -> (u32, u32) {
            (100, 100)
        }

        fn capture(&self, _frame: &mut RawFrame) -> Result<(), VistreamError> {
            Ok(())
        }

        fn element_at(&self, x: i32, y: i32) -> Option<Element> {
            ((10..50).contains(&x) && (10..30).contains(&y)).then_some(BUTTON)
        }

        fn focused(&self) -> Option<Element> {
            self.focus
        }

        fn dispatch(&self, target: ElementId, event: InputEvent) {
            self.events.lock().push((target, event));
        }
    }

    #[test]
    fn click_hits_element_in_local_coordinates() {
        let surface = FakeSurface::default();
        apply_click(&surface, 15, 12);
        let button = MouseButton::Primary;
        assert_eq!(
            *surface.events.lock(),
            vec![
                (1, InputEvent::MousePressed { x: 5, y: 2, button }),
                (1, InputEvent::MouseReleased { x: 5, y: 2, button }),
                (1, InputEvent::MouseClicked { x: 5, y: 2, button }),
            ]
        );
    }

    #[test]
    fn click_outside_elements_goes_to_root() {
        let surface = FakeSurface::default();
        apply_click(&surface, 80, 80);
        let events = surface.events.lock();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|(id, _)| *id == 0));
        assert_eq!(
            events[0].1,
            InputEvent::MousePressed {
                x: 80,
                y: 80,
                button: MouseButton::Primary
            }
        );
    }

    #[test]
    fn press_targets_focus_or_root() {
        let surface = FakeSurface {
            focus: Some(Element {
                id: 4,
                origin_x: 0,
                origin_y: 0,
            }),
            ..FakeSurface::default()
        };
        apply_press(&surface, 'q');
        assert_eq!(
            *surface.events.lock(),
            vec![
                (4, InputEvent::KeyPressed { code: 0x51, ch: 'q' }),
                (4, InputEvent::KeyTyped { ch: 'q' }),
                (4, InputEvent::KeyReleased { code: 0x51, ch: 'q' }),
            ]
        );

        let unfocused = FakeSurface::default();
        apply_press(&unfocused, '!');
        assert!(unfocused.events.lock().iter().all(|(id, _)| *id == 0));
    }

    #[tokio::test]
    async fn worker_applies_commands_in_order() {
        let surface = Arc::new(FakeSurface::default());
        let injector =
            RemoteInputInjector::new("1", Arc::clone(&surface) as Arc<dyn Surface>, &Handle::current());
        injector.click(20, 20);
        injector.press('a');
        assert_eq!(injector.submitted(), 2);

        tokio::time::timeout(Duration::from_secs(2), async {
            while surface.events.lock().len() < 6 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        let events = surface.events.lock();
        assert!(matches!(events[0].1, InputEvent::MousePressed { .. }));
        assert!(matches!(events[5].1, InputEvent::KeyReleased { .. }));
    }
}
