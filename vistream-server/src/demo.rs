//! Demo app: bouncing balls above a control bar.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  ●        ●                                  │
//! │                 ●                            │
//! ├──────────────────────────────────────────────┤
//! │ [Change Color] [Reset] [Toggle Speed] [____] │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The scene advances in fixed 16 ms steps, caught up on each capture,
//! so it animates only while someone is watching.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use vistream_core::input::{Element, ElementId, InputEvent, Surface};
use vistream_core::{RawFrame, VistreamError};

const BALL_RADIUS: f64 = 25.0;
const STEP: Duration = Duration::from_millis(16);
const MAX_CATCH_UP_STEPS: u32 = 120;

const BAR_HEIGHT: i32 = 48;
const CONTROL_HEIGHT: i32 = 32;
const BUTTON_WIDTH: i32 = 130;
const FIELD_WIDTH: i32 = 240;
const GAP: i32 = 12;
const GRID: i32 = 40;
const MAX_TEXT: usize = 40;
const GLYPH_W: i32 = 7;
const GLYPH_H: i32 = 12;

type Rgb = [u8; 3];

const PALETTE: [Rgb; 6] = [
    [0, 200, 255],
    [255, 100, 100],
    [100, 255, 100],
    [255, 200, 50],
    [200, 100, 255],
    [255, 150, 200],
];

const WHITE: Rgb = [255, 255, 255];
const BAR: Rgb = [40, 40, 60];
const BUTTON: Rgb = [70, 70, 110];
const BUTTON_PRESSED: Rgb = [110, 110, 170];
const INK: Rgb = [30, 30, 30];

// ── Controls ─────────────────────────────────────────────────────

/// Interactive elements of the control bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    ChangeColor,
    Reset,
    ToggleSpeed,
    TextField,
}

impl Control {
    pub const ALL: [Control; 4] = [
        Control::ChangeColor,
        Control::Reset,
        Control::ToggleSpeed,
        Control::TextField,
    ];

    pub fn id(self) -> ElementId {
        match self {
            Control::ChangeColor => 1,
            Control::Reset => 2,
            Control::ToggleSpeed => 3,
            Control::TextField => 4,
        }
    }

    pub fn from_id(id: ElementId) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.id() == id)
    }

    pub fn label(self) -> &'static str {
        match self {
            Control::ChangeColor => "Change Color",
            Control::Reset => "Reset",
            Control::ToggleSpeed => "Toggle Speed",
            Control::TextField => "",
        }
    }

    fn width(self) -> i32 {
        match self {
            Control::TextField => FIELD_WIDTH,
            _ => BUTTON_WIDTH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x: i32,
    y: i32,
    w: i32,
    h: i32,
}

impl Rect {
    fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }
}

/// Controls are centred in one row inside the bar.
fn control_rect(width: u32, height: u32, control: Control) -> Rect {
    let total: i32 = Control::ALL.iter().map(|c| c.width()).sum::<i32>()
        + GAP * (Control::ALL.len() as i32 - 1);
    let mut x = (width as i32 - total) / 2;
    let y = height as i32 - BAR_HEIGHT + (BAR_HEIGHT - CONTROL_HEIGHT) / 2;
    for c in Control::ALL {
        if c == control {
            break;
        }
        x += c.width() + GAP;
    }
    Rect {
        x,
        y,
        w: control.width(),
        h: CONTROL_HEIGHT,
    }
}

// ── Scene state ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Ball {
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
    color: usize,
}

fn initial_balls() -> Vec<Ball> {
    vec![
        Ball { x: 200.0, y: 150.0, vx: 3.0, vy: 2.0, color: 0 },
        Ball { x: 500.0, y: 300.0, vx: -2.5, vy: 3.0, color: 1 },
        Ball { x: 800.0, y: 200.0, vx: 2.0, vy: -2.5, color: 2 },
    ]
}

#[derive(Debug)]
struct Scene {
    balls: Vec<Ball>,
    color_index: usize,
    fast: bool,
    text: String,
    focus: Control,
    pressed: Option<Control>,
    last_step: Instant,
}

impl Scene {
    fn new() -> Self {
        Self {
            balls: initial_balls(),
            color_index: 0,
            fast: false,
            text: "Hello vistream!".into(),
            focus: Control::TextField,
            pressed: None,
            last_step: Instant::now(),
        }
    }

    fn cycle_color(&mut self) {
        self.color_index = (self.color_index + 1) % PALETTE.len();
        for (i, ball) in self.balls.iter_mut().enumerate() {
            ball.color = (self.color_index + i) % PALETTE.len();
        }
    }

    fn reset(&mut self) {
        self.balls = initial_balls();
        self.color_index = 0;
        self.fast = false;
    }

    fn type_char(&mut self, ch: char) {
        match ch {
            '\u{8}' | '\u{7f}' => {
                self.text.pop();
            }
            c if c.is_control() => {}
            c if self.text.chars().count() < MAX_TEXT => self.text.push(c),
            _ => {}
        }
    }

    /// Catch the simulation up to `now`.
    fn advance(&mut self, now: Instant, width: f64, height: f64) {
        let elapsed = now.saturating_duration_since(self.last_step);
        let steps = (elapsed.as_millis() / STEP.as_millis()) as u32;
        if steps == 0 {
            return;
        }
        if steps > MAX_CATCH_UP_STEPS {
            self.last_step = now;
        } else {
            self.last_step += STEP * steps;
        }
        for _ in 0..steps.min(MAX_CATCH_UP_STEPS) {
            self.step(width, height);
        }
    }

    fn step(&mut self, width: f64, height: f64) {
        if width <= 0.0 || height <= 0.0 {
            return;
        }
        let speed = if self.fast { 2.0 } else { 1.0 };
        for b in &mut self.balls {
            b.x += b.vx * speed;
            b.y += b.vy * speed;
            if b.x - BALL_RADIUS < 0.0 {
                b.x = BALL_RADIUS;
                b.vx = b.vx.abs();
            }
            if b.x + BALL_RADIUS > width {
                b.x = width - BALL_RADIUS;
                b.vx = -b.vx.abs();
            }
            if b.y - BALL_RADIUS < 0.0 {
                b.y = BALL_RADIUS;
                b.vy = b.vy.abs();
            }
            if b.y + BALL_RADIUS > height {
                b.y = height - BALL_RADIUS;
                b.vy = -b.vy.abs();
            }
        }
    }
}

// ── BouncingBalls ────────────────────────────────────────────────

/// The demo [`Surface`].
pub struct BouncingBalls {
    width: u32,
    height: u32,
    scene: Mutex<Scene>,
}

impl BouncingBalls {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            scene: Mutex::new(Scene::new()),
        }
    }

    pub fn is_fast(&self) -> bool {
        self.scene.lock().fast
    }

    pub fn color_index(&self) -> usize {
        self.scene.lock().color_index
    }

    pub fn text(&self) -> String {
        self.scene.lock().text.clone()
    }

    /// Centre of a control in surface coordinates.
    pub fn control_center(&self, control: Control) -> (i32, i32) {
        let r = control_rect(self.width, self.height, control);
        (r.x + r.w / 2, r.y + r.h / 2)
    }

    fn panel_height(&self) -> i32 {
        (self.height as i32 - BAR_HEIGHT).max(0)
    }

    fn element(&self, control: Control) -> Element {
        let r = control_rect(self.width, self.height, control);
        Element {
            id: control.id(),
            origin_x: r.x,
            origin_y: r.y,
        }
    }

    fn render(&self, scene: &Scene, frame: &mut RawFrame) {
        let width = frame.width as i32;
        let panel = self.panel_height().min(frame.height as i32);

        // Background gradient and grid.
        for y in 0..panel {
            let t = y as f32 / panel.max(1) as f32;
            let r = 25.0 + 25.0 * t;
            let b = 50.0;
            let g = 25.0;
            frame.fill_rect(0, y, frame.width, 1, bgra([r as u8, g as u8, b as u8]));
        }
        for x in (0..width).step_by(GRID as usize) {
            blend_rect(frame, x, 0, 1, panel, WHITE, 15);
        }
        for y in (0..panel).step_by(GRID as usize) {
            blend_rect(frame, 0, y, width, 1, WHITE, 15);
        }

        for ball in &scene.balls {
            let color = PALETTE[ball.color % PALETTE.len()];
            blend_circle(frame, ball.x, ball.y, BALL_RADIUS * 2.0, color, 40, panel);
            blend_circle(frame, ball.x, ball.y, BALL_RADIUS, color, 255, panel);
            blend_circle(
                frame,
                ball.x - BALL_RADIUS * 0.25,
                ball.y - BALL_RADIUS * 0.4,
                BALL_RADIUS * 0.3,
                WHITE,
                80,
                panel,
            );
        }

        // Speed indicator in place of a status line.
        let indicator = if scene.fast { PALETTE[3] } else { [120, 120, 140] };
        frame.fill_rect(10, 10, 12, 12, bgra(indicator));

        // Control bar.
        frame.fill_rect(0, panel, frame.width, BAR_HEIGHT as u32, bgra(BAR));
        for control in Control::ALL {
            let r = control_rect(self.width, self.height, control);
            match control {
                Control::TextField => self.render_field(scene, frame, r),
                _ => {
                    let fill = if scene.pressed == Some(control) {
                        BUTTON_PRESSED
                    } else {
                        BUTTON
                    };
                    frame.fill_rect(r.x, r.y, r.w as u32, r.h as u32, bgra(fill));
                    // One light tick per label character.
                    let label_w = control.label().len() as i32 * 4;
                    let lx = r.x + (r.w - label_w) / 2;
                    for (i, ch) in control.label().chars().enumerate() {
                        if ch != ' ' {
                            frame.fill_rect(lx + i as i32 * 4, r.y + 13, 3, 6, bgra(WHITE));
                        }
                    }
                }
            }
        }
    }

    fn render_field(&self, scene: &Scene, frame: &mut RawFrame, r: Rect) {
        frame.fill_rect(r.x, r.y, r.w as u32, r.h as u32, bgra(WHITE));
        let mut x = r.x + 6;
        let y = r.y + (r.h - GLYPH_H) / 2;
        for ch in scene.text.chars() {
            if x + GLYPH_W > r.x + r.w - 6 {
                break;
            }
            if !ch.is_whitespace() {
                frame.fill_rect(x, y, (GLYPH_W - 2) as u32, GLYPH_H as u32, bgra(INK));
            }
            x += GLYPH_W;
        }
        if scene.focus == Control::TextField {
            frame.fill_rect(x, y - 1, 1, (GLYPH_H + 2) as u32, bgra(INK));
        }
    }
}

impl Surface for BouncingBalls {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capture(&self, frame: &mut RawFrame) -> Result<(), VistreamError> {
        frame.validate()?;
        let mut scene = self.scene.lock();
        scene.advance(
            Instant::now(),
            f64::from(self.width),
            f64::from(self.panel_height()),
        );
        self.render(&scene, frame);
        frame.captured_at = Instant::now();
        Ok(())
    }

    fn element_at(&self, x: i32, y: i32) -> Option<Element> {
        Control::ALL
            .into_iter()
            .find(|&c| control_rect(self.width, self.height, c).contains(x, y))
            .map(|c| self.element(c))
    }

    fn focused(&self) -> Option<Element> {
        Some(self.element(self.scene.lock().focus))
    }

    fn dispatch(&self, target: ElementId, event: InputEvent) {
        let control = Control::from_id(target);
        let mut scene = self.scene.lock();
        match event {
            InputEvent::MousePressed { .. } => {
                if let Some(c) = control {
                    scene.pressed = Some(c);
                    scene.focus = c;
                }
            }
            InputEvent::MouseReleased { .. } => scene.pressed = None,
            InputEvent::MouseClicked { .. } => match control {
                Some(Control::ChangeColor) => scene.cycle_color(),
                Some(Control::Reset) => scene.reset(),
                Some(Control::ToggleSpeed) => scene.fast = !scene.fast,
                Some(Control::TextField) | None => {}
            },
            InputEvent::KeyTyped { ch } if control == Some(Control::TextField) => {
                scene.type_char(ch);
            }
            InputEvent::KeyPressed { .. }
            | InputEvent::KeyTyped { .. }
            | InputEvent::KeyReleased { .. } => {}
        }
    }
}

// ── Raster helpers ───────────────────────────────────────────────

fn bgra([r, g, b]: Rgb) -> [u8; 4] {
    [b, g, r, 255]
}

/// Alpha-blend a solid rectangle, clipped to the frame.
fn blend_rect(frame: &mut RawFrame, x: i32, y: i32, w: i32, h: i32, rgb: Rgb, alpha: u8) {
    if w <= 0 || h <= 0 {
        return;
    }
    if alpha == 255 {
        frame.fill_rect(x, y, w as u32, h as u32, bgra(rgb));
        return;
    }
    let x0 = x.max(0) as usize;
    let y0 = y.max(0) as usize;
    let x1 = (x + w).clamp(0, frame.width as i32) as usize;
    let y1 = (y + h).clamp(0, frame.height as i32) as usize;
    if x0 >= x1 || y0 >= y1 {
        return;
    }
    let src = bgra(rgb);
    let a = u16::from(alpha);
    let stride = frame.stride();
    for row in y0..y1 {
        let line = &mut frame.data[row * stride + x0 * 4..row * stride + x1 * 4];
        for px in line.chunks_exact_mut(4) {
            for c in 0..3 {
                let d = u16::from(px[c]);
                let s = u16::from(src[c]);
                px[c] = ((d * (255 - a) + s * a) / 255) as u8;
            }
        }
    }
}

/// Alpha-blend a filled circle, clipped to rows above `max_y`.
fn blend_circle(
    frame: &mut RawFrame,
    cx: f64,
    cy: f64,
    r: f64,
    rgb: Rgb,
    alpha: u8,
    max_y: i32,
) {
    let y0 = (cy - r).floor().max(0.0) as i32;
    let y1 = ((cy + r).ceil() as i32).min(max_y);
    for y in y0..y1 {
        let dy = f64::from(y) + 0.5 - cy;
        let span = r * r - dy * dy;
        if span <= 0.0 {
            continue;
        }
        let half = span.sqrt();
        let x0 = (cx - half).round() as i32;
        let x1 = (cx + half).round() as i32;
        blend_rect(frame, x0, y, x1 - x0, 1, rgb, alpha);
    }
}

// ── Tests ────────────────────────────────────────────────────────
