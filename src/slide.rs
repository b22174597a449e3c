use std::path::{Path, PathBuf};

use fontdue::layout::{CoordinateSystem, Layout, LayoutSettings, TextStyle};
use fontdue::{Font, FontSettings};
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgba, RgbaImage};
use tracing::{debug, warn};

use crate::builtin_font;
use crate::config::SlideConfig;
use crate::error::{SlidecastError, SlidecastResult};

/// Tried in order after the configured font.
const SYSTEM_FONT_CANDIDATES: [&str; 6] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundSource {
    Image(PathBuf),
    Gradient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontSource {
    TrueType(PathBuf),
    Builtin,
}

enum Face {
    TrueType(Font),
    Builtin { scale: u32 },
}

/// Renders narration text onto fixed-size slides. Background and font are
/// resolved once per renderer; every fallback is logged, none is fatal.
pub struct SlideRenderer {
    config: SlideConfig,
    background: RgbaImage,
    background_source: BackgroundSource,
    face: Face,
    font_source: FontSource,
}

impl SlideRenderer {
    pub fn new(config: &SlideConfig) -> Self {
        let (background, background_source) = load_background(config);
        let (face, font_source) = load_face(config);
        debug!(?background_source, ?font_source, "slide renderer ready");
        Self {
            config: config.clone(),
            background,
            background_source,
            face,
            font_source,
        }
    }

    pub fn background_source(&self) -> &BackgroundSource {
        &self.background_source
    }

    pub fn font_source(&self) -> &FontSource {
        &self.font_source
    }

    /// Draws `text` onto a copy of the background without touching disk.
    pub fn compose(&self, text: &str) -> RgbaImage {
        let mut canvas = self.background.clone();
        let color = [
            self.config.text_color[0],
            self.config.text_color[1],
            self.config.text_color[2],
            255,
        ];
        let [origin_x, origin_y] = self.config.text_origin;

        let lines = wrap_words(text, self.config.wrap_chars);
        for (row, line) in lines.iter().take(self.config.max_lines).enumerate() {
            let offset = u32::try_from(row)
                .unwrap_or(u32::MAX)
                .saturating_mul(self.config.line_spacing);
            let y = origin_y.saturating_add(offset);
            if origin_x >= canvas.width() || y >= canvas.height() {
                break;
            }
            match &self.face {
                Face::TrueType(font) => draw_truetype_line(
                    &mut canvas,
                    font,
                    self.config.font_size,
                    origin_x,
                    y,
                    line,
                    color,
                ),
                Face::Builtin { scale } => {
                    draw_builtin_line(&mut canvas, *scale, origin_x, y, line, color)
                }
            }
        }
        canvas
    }

    /// Renders `text` and writes it as PNG to `out_path`. Only the write can fail.
    pub fn render(&self, text: &str, out_path: &Path) -> SlidecastResult<()> {
        let canvas = self.compose(text);
        canvas
            .save_with_format(out_path, ImageFormat::Png)
            .map_err(|error| SlidecastError::AssetRenderFailure {
                path: out_path.to_path_buf(),
                reason: error.to_string(),
            })
    }
}

/// Greedy word wrap on a character budget. A word longer than the budget is
/// hard-split into budget-sized pieces, so no line ever exceeds it.
pub fn wrap_words(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let chars = word.chars().collect::<Vec<_>>();
        for piece in chars.chunks(max_chars) {
            if current_len > 0 && current_len + 1 + piece.len() > max_chars {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.extend(piece);
            current_len += piece.len();
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn load_background(config: &SlideConfig) -> (RgbaImage, BackgroundSource) {
    if let Some(path) = &config.background {
        match image::open(path) {
            Ok(image) => {
                let resized = imageops::resize(
                    &image.to_rgba8(),
                    config.width,
                    config.height,
                    FilterType::Lanczos3,
                );
                return (resized, BackgroundSource::Image(path.clone()));
            }
            Err(error) => {
                warn!(
                    path = %path.display(),
                    %error,
                    "background image unusable, using gradient"
                );
            }
        }
    }
    (gradient_background(config), BackgroundSource::Gradient)
}

/// Vertical two-tone gradient from `gradient_top` to `gradient_bottom`.
pub fn gradient_background(config: &SlideConfig) -> RgbaImage {
    let top = config.gradient_top;
    let bottom = config.gradient_bottom;
    let height = config.height.max(1);
    RgbaImage::from_fn(config.width, config.height, |_, y| {
        let t = y as f32 / height as f32;
        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        Rgba([
            mix(top[0], bottom[0]),
            mix(top[1], bottom[1]),
            mix(top[2], bottom[2]),
            255,
        ])
    })
}

fn load_face(config: &SlideConfig) -> (Face, FontSource) {
    let candidates = config
        .font
        .iter()
        .cloned()
        .chain(SYSTEM_FONT_CANDIDATES.iter().map(PathBuf::from));

    for path in candidates {
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) => {
                if config.font.as_ref() == Some(&path) {
                    warn!(path = %path.display(), %error, "configured font unreadable");
                }
                continue;
            }
        };
        match Font::from_bytes(bytes, FontSettings::default()) {
            Ok(font) => return (Face::TrueType(font), FontSource::TrueType(path)),
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to parse font");
            }
        }
    }

    warn!("no TrueType font available, using built-in bitmap font");
    (
        Face::Builtin {
            scale: builtin_font::scale_for(config.font_size),
        },
        FontSource::Builtin,
    )
}

fn draw_truetype_line(
    canvas: &mut RgbaImage,
    font: &Font,
    font_size: f32,
    x: u32,
    y: u32,
    text: &str,
    color: [u8; 4],
) {
    let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
    layout.reset(&LayoutSettings {
        x: x as f32,
        y: y as f32,
        max_width: None,
        max_height: None,
        horizontal_align: fontdue::layout::HorizontalAlign::Left,
        vertical_align: fontdue::layout::VerticalAlign::Top,
        line_height: 1.0,
        wrap_style: fontdue::layout::WrapStyle::Word,
        wrap_hard_breaks: true,
    });
    layout.append(&[font], &TextStyle::new(text, font_size, 0));

    for glyph in layout.glyphs() {
        if glyph.width == 0 || glyph.height == 0 {
            continue;
        }
        let (_, bitmap) = font.rasterize_config(glyph.key);
        blend_mask(
            canvas,
            glyph.x.round() as i32,
            glyph.y.round() as i32,
            glyph.width,
            glyph.height,
            |col, row| bitmap[row * glyph.width + col],
            color,
        );
    }
}

fn draw_builtin_line(
    canvas: &mut RgbaImage,
    scale: u32,
    x: u32,
    y: u32,
    text: &str,
    color: [u8; 4],
) {
    let cell_w = (builtin_font::GLYPH_WIDTH * scale) as usize;
    let cell_h = (builtin_font::GLYPH_HEIGHT * scale) as usize;
    let (Ok(mut pen_x), Ok(y)) = (i32::try_from(x), i32::try_from(y)) else {
        return;
    };
    let advance = i32::try_from(builtin_font::advance(scale)).unwrap_or(i32::MAX);
    for ch in text.chars() {
        if pen_x >= canvas.width() as i32 {
            break;
        }
        blend_mask(
            canvas,
            pen_x,
            y,
            cell_w,
            cell_h,
            |col, row| {
                if builtin_font::sample(ch, col as u32 / scale, row as u32 / scale) {
                    255
                } else {
                    0
                }
            },
            color,
        );
        pen_x = pen_x.saturating_add(advance);
    }
}

/// Alpha-blends a coverage mask of `width`x`height` at (`x`, `y`), clipping to the canvas.
fn blend_mask(
    canvas: &mut RgbaImage,
    x: i32,
    y: i32,
    width: usize,
    height: usize,
    coverage: impl Fn(usize, usize) -> u8,
    color: [u8; 4],
) {
    let (frame_width, frame_height) = canvas.dimensions();
    for row in 0..height {
        let py = y + row as i32;
        if py < 0 || py >= frame_height as i32 {
            continue;
        }
        for col in 0..width {
            let px = x + col as i32;
            if px < 0 || px >= frame_width as i32 {
                continue;
            }
            let mask = coverage(col, row);
            if mask == 0 {
                continue;
            }
            let alpha = ((u16::from(mask) * u16::from(color[3])) / 255) as u8;
            blend_pixel(
                canvas.get_pixel_mut(px as u32, py as u32),
                [color[0], color[1], color[2], alpha],
            );
        }
    }
}

fn blend_pixel(dst: &mut Rgba<u8>, src: [u8; 4]) {
    let alpha = u16::from(src[3]);
    if alpha == 0 {
        return;
    }
    let inv_alpha = 255_u16.saturating_sub(alpha);
    for channel in 0..3 {
        let d = u16::from(dst.0[channel]);
        let s = u16::from(src[channel]);
        dst.0[channel] = ((s * alpha + d * inv_alpha + 127) / 255) as u8;
    }
    dst.0[3] = 255;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn builtin_config() -> SlideConfig {
        SlideConfig {
            width: 64,
            height: 48,
            ..SlideConfig::default()
        }
    }

    // System fonts vary between machines; pixel assertions pin the bitmap face.
    fn builtin_renderer(config: SlideConfig) -> SlideRenderer {
        SlideRenderer {
            background: gradient_background(&config),
            background_source: BackgroundSource::Gradient,
            face: Face::Builtin {
                scale: builtin_font::scale_for(config.font_size),
            },
            font_source: FontSource::Builtin,
            config,
        }
    }

    #[test]
    fn wrap_respects_budget_and_preserves_words() {
        let lines = wrap_words("one two three four", 10);
        assert!(lines.iter().all(|line| line.chars().count() <= 10), "{lines:?}");
        let rejoined = lines.join(" ");
        assert_eq!(
            rejoined.split_whitespace().collect::<Vec<_>>(),
            vec!["one", "two", "three", "four"]
        );
        assert_eq!(lines, vec!["one two", "three four"]);
    }

    #[test]
    fn wrap_hard_splits_overlong_words() {
        let lines = wrap_words("a supercalifragilistic b", 8);
        assert_eq!(lines, vec!["a", "supercal", "ifragili", "stic b"]);
        assert!(lines.iter().all(|line| line.chars().count() <= 8), "{lines:?}");
    }

    #[test]
    fn wrap_never_exceeds_budget_for_any_width() {
        let text = "the quick brownish foxes jumped over extraordinarily lazy dogs";
        for budget in 1..=20 {
            let lines = wrap_words(text, budget);
            assert!(
                lines.iter().all(|line| line.chars().count() <= budget),
                "budget {budget}: {lines:?}"
            );
            let letters = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
            assert_eq!(letters(&lines.join(" ")), letters(text), "budget {budget}");
        }
    }

    #[test]
    fn wrap_of_blank_text_is_empty() {
        assert!(wrap_words("   ", 10).is_empty());
    }

    #[test]
    fn wrap_counts_characters_not_bytes() {
        assert_eq!(wrap_words("héllo wörld", 11), vec!["héllo wörld"]);
    }

    #[test]
    fn missing_background_falls_back_to_gradient_of_canvas_size() {
        let config = SlideConfig {
            background: Some(PathBuf::from("/nonexistent/slidecast/bg.jpg")),
            ..builtin_config()
        };
        let renderer = SlideRenderer::new(&config);
        assert_eq!(renderer.background_source(), &BackgroundSource::Gradient);

        let dir = tempdir().expect("tempdir should create");
        let out = dir.path().join("slide.png");
        renderer.render("Hello there", &out).expect("render should succeed");
        let written = image::open(&out).expect("png should decode");
        assert_eq!((written.width(), written.height()), (64, 48));
    }

    #[test]
    fn corrupt_background_falls_back_to_gradient() {
        let dir = tempdir().expect("tempdir should create");
        let bg = dir.path().join("bg.jpg");
        std::fs::write(&bg, b"not really a jpeg").expect("write should succeed");
        let config = SlideConfig {
            background: Some(bg),
            ..builtin_config()
        };
        let renderer = SlideRenderer::new(&config);
        assert_eq!(renderer.background_source(), &BackgroundSource::Gradient);
    }

    #[test]
    fn background_image_is_resized_to_canvas() {
        let dir = tempdir().expect("tempdir should create");
        let bg = dir.path().join("bg.png");
        RgbaImage::from_pixel(10, 10, Rgba([200, 10, 10, 255]))
            .save(&bg)
            .expect("png should write");
        let config = SlideConfig {
            background: Some(bg.clone()),
            ..builtin_config()
        };
        let renderer = SlideRenderer::new(&config);
        assert_eq!(renderer.background_source(), &BackgroundSource::Image(bg));
        let canvas = renderer.compose("");
        assert_eq!(canvas.dimensions(), (64, 48));
        assert_eq!(canvas.get_pixel(32, 24).0[0], 200);
    }

    #[test]
    fn gradient_runs_top_to_bottom() {
        let config = builtin_config();
        let gradient = gradient_background(&config);
        assert_eq!(gradient.get_pixel(0, 0).0, [255, 255, 255, 255]);
        let bottom = gradient.get_pixel(0, config.height - 1).0;
        assert!(bottom[0] < 20 && bottom[2] == 255, "{bottom:?}");
    }

    #[test]
    fn builtin_font_draws_text_pixels() {
        let config = SlideConfig {
            width: 200,
            height: 100,
            text_origin: [4, 4],
            ..SlideConfig::default()
        };
        let renderer = builtin_renderer(config.clone());
        let blank = gradient_background(&config);
        let drawn = renderer.compose("Hi");
        assert_ne!(blank.as_raw(), drawn.as_raw());
    }

    #[test]
    fn lines_past_the_cap_are_not_drawn() {
        let config = SlideConfig {
            width: 120,
            height: 400,
            font_size: 8.0,
            wrap_chars: 3,
            max_lines: 2,
            text_origin: [0, 0],
            line_spacing: 20,
            ..SlideConfig::default()
        };
        let renderer = builtin_renderer(config.clone());
        let canvas = renderer.compose("aaa bbb ccc ddd");
        let background = gradient_background(&config);

        // Rows at and below the third line start must match the bare background.
        for y in 40..config.height {
            for x in 0..config.width {
                assert_eq!(canvas.get_pixel(x, y), background.get_pixel(x, y), "({x}, {y})");
            }
        }
        // The second line is drawn.
        let second_line_touched = (20..40)
            .any(|y| (0..config.width).any(|x| canvas.get_pixel(x, y) != background.get_pixel(x, y)));
        assert!(second_line_touched);
    }

    #[test]
    fn huge_text_offsets_leave_background_untouched() {
        let config = SlideConfig {
            width: 64,
            height: 48,
            text_origin: [u32::MAX - 1, u32::MAX - 1],
            line_spacing: u32::MAX,
            ..SlideConfig::default()
        };
        let renderer = builtin_renderer(config.clone());
        let canvas = renderer.compose("one two three four five six seven eight nine ten");
        assert_eq!(canvas.as_raw(), gradient_background(&config).as_raw());

        let spaced = SlideConfig {
            text_origin: [0, 0],
            wrap_chars: 3,
            ..config
        };
        let renderer = builtin_renderer(spaced.clone());
        let canvas = renderer.compose("aaa bbb ccc");
        assert_ne!(canvas.as_raw(), gradient_background(&spaced).as_raw());
    }

    #[test]
    fn unwritable_output_is_asset_render_failure() {
        let renderer = builtin_renderer(builtin_config());
        let error = renderer
            .render("x", Path::new("/nonexistent/slidecast/dir/slide.png"))
            .expect_err("write into missing dir should fail");
        assert_eq!(error.code(), "ASSET_RENDER_FAILURE");
    }
}
