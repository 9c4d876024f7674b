use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use log::debug;
use rusttype::{Font, Scale};
use scraper::{ElementRef, Html, Selector};

use crate::config::constants;
use crate::error::RenderError;

/// A rendered post: PNG bytes plus the raster size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Anything that can turn post text into an image.
pub trait ImageRenderer {
    fn render(&self, text: &str) -> Result<RenderedImage, RenderError>;
}

/// Fixed visual style of the confession card.
///
/// Lengths are CSS pixels and get multiplied by `dpi / 96` when rasterized.
#[derive(Debug, Clone)]
pub struct RenderStyle {
    pub page_width_px: u32,
    pub dpi: f32,
    pub padding_px: f32,
    pub font_size_px: f32,
    /// Line box height as a multiple of the font size.
    pub line_height: f32,
    pub accent_width_px: f32,
    pub background: Rgb<u8>,
    pub foreground: Rgb<u8>,
    pub accent: Rgb<u8>,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            page_width_px: constants::PAGE_WIDTH_PX,
            dpi: constants::RENDER_DPI,
            padding_px: 24.0,
            font_size_px: 17.0,
            line_height: 1.4,
            accent_width_px: 6.0,
            background: Rgb([255, 255, 255]),
            foreground: Rgb([20, 23, 26]),
            accent: Rgb([29, 79, 145]),
        }
    }
}

impl RenderStyle {
    /// Raster pixels per CSS pixel.
    pub fn scale(&self) -> f32 {
        self.dpi / constants::CSS_DPI
    }

    /// Width of every rendered image, in raster pixels.
    pub fn raster_width(&self) -> u32 {
        (self.page_width_px as f32 * self.scale()).round() as u32
    }

    fn padding(&self) -> f32 {
        self.padding_px * self.scale()
    }

    fn content_width(&self) -> f32 {
        (self.raster_width() as f32 - 2.0 * self.padding()).max(1.0)
    }
}

/// Markup template with exactly one text marker.
#[derive(Debug, Clone)]
pub struct Template {
    markup: String,
}

impl Template {
    pub fn load(path: &Path) -> Result<Self, RenderError> {
        let markup = fs::read_to_string(path).map_err(|e| RenderError::TemplateReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_markup(markup, &path.display().to_string())
    }

    /// Wrap in-memory markup; `origin` only names it in errors.
    pub fn from_markup(markup: impl Into<String>, origin: &str) -> Result<Self, RenderError> {
        let markup = markup.into();
        if !markup.contains(constants::TEXT_MARKER) {
            return Err(RenderError::MissingMarker {
                path: origin.to_string(),
                marker: constants::TEXT_MARKER.to_string(),
            });
        }
        Ok(Self { markup })
    }

    /// Escape `text`, turn its line breaks into `<br>` and put it at the marker.
    pub fn substitute(&self, text: &str) -> String {
        let escaped = text
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;");
        let with_breaks = escaped
            .replace("\r\n", "<br>")
            .replace(['\r', '\n'], "<br>");
        self.markup.replace(constants::TEXT_MARKER, &with_breaks)
    }
}

/// The primary font followed by fallbacks, tried in order per character.
pub struct FontSet {
    fonts: Vec<Font<'static>>,
}

impl FontSet {
    pub fn load(primary: &Path, fallbacks: &[PathBuf]) -> Result<Self, RenderError> {
        let primary = load_font(primary)?;
        let fallbacks = fallbacks
            .iter()
            .map(|path| load_font(path))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(primary, fallbacks))
    }

    pub fn new(primary: Font<'static>, fallbacks: Vec<Font<'static>>) -> Self {
        let mut fonts = Vec::with_capacity(fallbacks.len() + 1);
        fonts.push(primary);
        fonts.extend(fallbacks);
        Self { fonts }
    }

    /// Index of the first font with a real glyph for `c`, else the primary.
    fn font_for(&self, c: char) -> usize {
        self.fonts
            .iter()
            .position(|font| font.glyph(c).id().0 != 0)
            .unwrap_or(0)
    }

    /// Split `text` into maximal runs drawn with the same font.
    fn runs<'t>(&self, text: &'t str) -> Vec<(usize, &'t str)> {
        let mut runs = Vec::new();
        let mut start = 0;
        let mut current = None;

        for (offset, c) in text.char_indices() {
            let font = self.font_for(c);
            match current {
                Some(active) if active != font => {
                    runs.push((active, &text[start..offset]));
                    start = offset;
                    current = Some(font);
                }
                None => current = Some(font),
                _ => {}
            }
        }
        if let Some(active) = current {
            runs.push((active, &text[start..]));
        }
        runs
    }

    /// Advance width of `text` at `px` raster pixels per em.
    pub fn text_width(&self, text: &str, px: f32) -> f32 {
        let scale = Scale::uniform(px);
        self.runs(text)
            .into_iter()
            .map(|(font, run)| run_width(&self.fonts[font], run, scale))
            .sum()
    }
}

fn load_font(path: &Path) -> Result<Font<'static>, RenderError> {
    let bytes = fs::read(path).map_err(|e| RenderError::FontLoadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Font::try_from_vec(bytes).ok_or_else(|| RenderError::FontLoadFailed {
        path: path.display().to_string(),
        reason: "not a TrueType/OpenType font".to_string(),
    })
}

fn run_width(font: &Font<'static>, text: &str, scale: Scale) -> f32 {
    let mut width = 0.0;
    let mut previous = None;
    for c in text.chars() {
        let glyph = font.glyph(c);
        let id = glyph.id();
        if let Some(previous) = previous {
            width += font.pair_kerning(scale, previous, id);
        }
        width += glyph.scaled(scale).h_metrics().advance_width;
        previous = Some(id);
    }
    width
}

/// A forced line of the flattened markup, before wrapping.
#[derive(Debug, Clone, PartialEq)]
pub struct HardLine {
    pub text: String,
    /// Font size relative to the body size.
    pub size: f32,
}

const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "section", "article", "header", "footer", "blockquote", "li", "ul", "ol",
    "h1", "h2", "h3", "h4", "h5", "h6",
];
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "template", "head", "title"];

fn heading_size(name: &str) -> Option<f32> {
    match name {
        "h1" => Some(1.5),
        "h2" => Some(1.3),
        "h3" => Some(1.15),
        _ => None,
    }
}

/// Flatten the `<body>` of `markup` into hard lines.
///
/// `<br>` always ends a line (so two in a row give a blank line), block
/// elements start and end lines, and runs of whitespace collapse to one space.
pub fn flatten_markup(markup: &str) -> Vec<HardLine> {
    let document = Html::parse_document(markup);
    let mut flattener = Flattener::default();

    if let Ok(body_selector) = Selector::parse("body") {
        if let Some(body) = document.select(&body_selector).next() {
            flattener.walk(body, 1.0);
        }
    }
    flattener.finish()
}

#[derive(Default)]
struct Flattener {
    lines: Vec<HardLine>,
    current: String,
    current_size: f32,
}

impl Flattener {
    fn walk(&mut self, element: ElementRef, size: f32) {
        for child in element.children() {
            if let Some(child_element) = ElementRef::wrap(child) {
                let name = child_element.value().name();
                if SKIPPED_ELEMENTS.contains(&name) {
                    continue;
                }
                if name == "br" {
                    self.break_line(size);
                    continue;
                }

                let is_block = BLOCK_ELEMENTS.contains(&name);
                let child_size = heading_size(name).unwrap_or(size);
                if is_block {
                    self.end_block();
                }
                self.walk(child_element, child_size);
                if is_block {
                    self.end_block();
                }
            } else if let Some(text) = child.value().as_text() {
                self.push_text(text, size);
            }
        }
    }

    fn push_text(&mut self, text: &str, size: f32) {
        for (i, word) in text.split_whitespace().enumerate() {
            let leading_space = i > 0 || text.starts_with(char::is_whitespace);
            if leading_space && !self.current.is_empty() && !self.current.ends_with(' ') {
                self.current.push(' ');
            }
            self.current.push_str(word);
            self.current_size = size;
        }
        if text.ends_with(char::is_whitespace)
            && !self.current.is_empty()
            && !self.current.ends_with(' ')
        {
            self.current.push(' ');
        }
    }

    fn break_line(&mut self, size: f32) {
        let text = self.current.trim_end().to_string();
        let size = if text.is_empty() { size } else { self.current_size };
        self.lines.push(HardLine { text, size });
        self.current.clear();
    }

    fn end_block(&mut self) {
        if !self.current.trim().is_empty() {
            self.break_line(self.current_size);
        } else {
            self.current.clear();
        }
    }

    fn finish(mut self) -> Vec<HardLine> {
        self.end_block();
        self.lines
    }
}

/// A wrapped line ready to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct LaidOutLine {
    pub text: String,
    pub font_px: f32,
    pub height_px: f32,
}

/// Result of the measure pass: every line placed, canvas size known.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub lines: Vec<LaidOutLine>,
    pub width: u32,
    pub height: u32,
}

/// Measure pass: wrap every hard line to the content width and sum the
/// line boxes to get the exact canvas height.
///
/// `measure(text, font_px)` returns the advance width of `text` in raster
/// pixels.
pub fn layout<M>(hard_lines: &[HardLine], style: &RenderStyle, measure: M) -> Layout
where
    M: Fn(&str, f32) -> f32,
{
    let scale = style.scale();
    let max_width = style.content_width();
    let mut lines = Vec::new();

    for hard_line in hard_lines {
        let font_px = style.font_size_px * hard_line.size * scale;
        let height_px = font_px * style.line_height;
        for text in wrap(&hard_line.text, max_width, |s| measure(s, font_px)) {
            lines.push(LaidOutLine {
                text,
                font_px,
                height_px,
            });
        }
    }

    let content_height: f32 = lines.iter().map(|line| line.height_px).sum();
    let height = (2.0 * style.padding() + content_height).ceil().max(1.0) as u32;

    Layout {
        lines,
        width: style.raster_width(),
        height,
    }
}

/// Greedy word wrap; words wider than the line are split between characters.
fn wrap<M>(text: &str, max_width: f32, measure: M) -> Vec<String>
where
    M: Fn(&str) -> f32,
{
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split(' ').filter(|w| !w.is_empty()) {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };
        if measure(&candidate) <= max_width {
            current = candidate;
            continue;
        }

        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }

        if measure(word) <= max_width {
            current = word.to_string();
            continue;
        }

        for c in word.chars() {
            let mut candidate = current.clone();
            candidate.push(c);
            if !current.is_empty() && measure(&candidate) > max_width {
                lines.push(std::mem::replace(&mut current, c.to_string()));
            } else {
                current = candidate;
            }
        }
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Renders post text as a confession card PNG.
///
/// Template and fonts are loaded once when the renderer is built and reused
/// for every post.
pub struct ConfessionRenderer {
    template: Template,
    fonts: FontSet,
    style: RenderStyle,
}

impl ConfessionRenderer {
    /// Load template and fonts from disk with the default style.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The template cannot be read or lacks the marker
    /// - Any font file cannot be read or parsed
    pub fn load(
        template_file: &Path,
        font_file: &Path,
        fallback_font_files: &[PathBuf],
    ) -> Result<Self, RenderError> {
        let template = Template::load(template_file)?;
        let fonts = FontSet::load(font_file, fallback_font_files)?;
        debug!(
            "Renderer loaded with {} fallback font(s)",
            fallback_font_files.len()
        );
        Ok(Self::new(template, fonts, RenderStyle::default()))
    }

    pub fn new(template: Template, fonts: FontSet, style: RenderStyle) -> Self {
        Self {
            template,
            fonts,
            style,
        }
    }

    /// Substitute and measure `text` without drawing it.
    pub fn measure(&self, text: &str) -> Result<Layout, RenderError> {
        let markup = self.template.substitute(text);
        let hard_lines = flatten_markup(&markup);
        if hard_lines.is_empty() {
            return Err(RenderError::EmptyLayout);
        }
        Ok(layout(&hard_lines, &self.style, |s, px| {
            self.fonts.text_width(s, px)
        }))
    }

    /// Raster pass: draw a measured layout onto a canvas of exactly its size.
    fn draw(&self, layout: &Layout) -> RgbImage {
        let mut canvas = RgbImage::from_pixel(layout.width, layout.height, self.style.background);

        let accent_width = (self.style.accent_width_px * self.style.scale()).round() as u32;
        if accent_width > 0 {
            draw_filled_rect_mut(
                &mut canvas,
                Rect::at(0, 0).of_size(accent_width, layout.height),
                self.style.accent,
            );
        }

        let padding = self.style.padding();
        let mut y = padding;
        for line in &layout.lines {
            let top = y + (line.height_px - line.font_px) / 2.0;
            let mut x = padding;
            for (font, run) in self.fonts.runs(&line.text) {
                let font = &self.fonts.fonts[font];
                draw_text_mut(
                    &mut canvas,
                    self.style.foreground,
                    x.round() as i32,
                    top.round() as i32,
                    Scale::uniform(line.font_px),
                    font,
                    run,
                );
                x += run_width(font, run, Scale::uniform(line.font_px));
            }
            y += line.height_px;
        }

        canvas
    }
}

impl ImageRenderer for ConfessionRenderer {
    fn render(&self, text: &str) -> Result<RenderedImage, RenderError> {
        let layout = self.measure(text)?;
        let canvas = self.draw(&layout);

        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(canvas)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| RenderError::EncodeFailed {
                reason: e.to_string(),
            })?;

        Ok(RenderedImage {
            bytes,
            width: layout.width,
            height: layout.height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every character is 10 raster pixels wide.
    fn monospace(text: &str, _px: f32) -> f32 {
        text.chars().count() as f32 * 10.0
    }

    fn line(text: &str) -> HardLine {
        HardLine {
            text: text.to_string(),
            size: 1.0,
        }
    }

    #[test]
    fn template_requires_marker() {
        let err = Template::from_markup("<p>nothing</p>", "inline").unwrap_err();
        assert!(matches!(err, RenderError::MissingMarker { .. }));
    }

    #[test]
    fn substitution_escapes_and_breaks_lines() {
        let template = Template::from_markup("<p>INSERT_TEXT_HERE</p>", "inline").unwrap();
        assert_eq!(
            template.substitute("a < b & c\nnext\r\nlast"),
            "<p>a &lt; b &amp; c<br>next<br>last</p>"
        );
    }

    #[test]
    fn flatten_keeps_breaks_and_blank_lines() {
        let lines = flatten_markup(
            "<html><head><style>p { color: red }</style></head>\
             <body><div class=\"card\">\n  <p>first   line<br><br>third &lt;3</p>\n</div></body></html>",
        );
        let texts: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["first line", "", "third <3"]);
    }

    #[test]
    fn flatten_sizes_headings() {
        let lines = flatten_markup("<body><h1>Title</h1><p>body <b>bold</b> text</p></body>");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "Title");
        assert_eq!(lines[0].size, 1.5);
        assert_eq!(lines[1].text, "body bold text");
        assert_eq!(lines[1].size, 1.0);
    }

    #[test]
    fn wrap_breaks_on_words() {
        let lines = wrap("aaa bbb ccc", 75.0, |s| monospace(s, 0.0));
        assert_eq!(lines, vec!["aaa bbb", "ccc"]);
    }

    #[test]
    fn wrap_splits_overlong_words() {
        let lines = wrap("abcdefghij", 40.0, |s| monospace(s, 0.0));
        assert_eq!(lines, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn wrap_keeps_empty_line() {
        assert_eq!(wrap("", 40.0, |s| monospace(s, 0.0)), vec![String::new()]);
    }

    #[test]
    fn layout_width_is_fixed_and_height_fits_content() {
        let style = RenderStyle::default();
        let short = layout(&[line("short")], &style, monospace);
        let long_text = "word ".repeat(200);
        let long = layout(&[line(long_text.trim())], &style, monospace);

        assert_eq!(short.width, 1038);
        assert_eq!(long.width, 1038);
        assert!(short.height > 0);
        assert!(long.height > short.height);

        let expected = 2.0 * style.padding() + short.lines[0].height_px;
        assert_eq!(short.height, expected.ceil() as u32);
    }

    const MONO: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf";
    const SANS: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

    /// DejaVu Sans Mono lacks the Latin `Ǆ` digraph; DejaVu Sans has it.
    fn mono_with_sans_fallback() -> Option<FontSet> {
        if !Path::new(MONO).exists() || !Path::new(SANS).exists() {
            eprintln!("DejaVu fonts not installed, skipping fallback test");
            return None;
        }
        Some(FontSet::load(Path::new(MONO), &[PathBuf::from(SANS)]).unwrap())
    }

    #[test]
    fn uncovered_character_falls_back_to_next_font() {
        let Some(fonts) = mono_with_sans_fallback() else {
            return;
        };

        assert_eq!(fonts.font_for('a'), 0);
        assert_eq!(fonts.font_for('\u{01C4}'), 1);
        assert_eq!(
            fonts.runs("ab\u{01C4}\u{01C4}cd"),
            vec![(0, "ab"), (1, "\u{01C4}\u{01C4}"), (0, "cd")]
        );
    }

    #[test]
    fn character_no_font_covers_stays_with_primary() {
        let Some(fonts) = mono_with_sans_fallback() else {
            return;
        };

        assert_eq!(fonts.font_for('\u{6F22}'), 0);
        assert_eq!(fonts.runs("a\u{6F22}"), vec![(0, "a\u{6F22}")]);
    }
}
