use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::foundation::core::Rgba8;
use crate::foundation::error::{SupercutError, SupercutResult};

/// Step used when shrinking an overlong title.
const SHRINK_STEP_PX: f32 = 2.0;
const ELLIPSIS: char = '\u{2026}';

/// Tried in order when the default sans-serif family is not installed.
const SANS_SERIF_CANDIDATES: [&str; 6] = [
    "Arial",
    "Helvetica",
    "DejaVu Sans",
    "Liberation Sans",
    "Noto Sans",
    "FreeSans",
];

/// Fill behind the title text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TitleBackground {
    #[default]
    Transparent,
    Solid { color: Rgba8 },
}

/// Non-temporal decoration baked into the title pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TitleDecoration {
    #[default]
    None,
    Shadow,
    Outline,
}

/// Appearance of the song-title layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleStyle {
    /// Canvas width in pixels.
    pub width: u32,
    /// Canvas height in pixels.
    pub height: u32,
    pub font_family: String,
    /// Font file loaded in addition to the system fonts; its family wins over `font_family`.
    pub font_file: Option<PathBuf>,
    pub font_size: f32,
    /// Smallest size tried before the text is truncated.
    pub min_font_size: f32,
    pub color: Rgba8,
    pub background: TitleBackground,
    /// Whole-layer opacity in `0.0..=1.0`.
    pub opacity: f32,
    pub decoration: TitleDecoration,
    /// Horizontal padding on each side, in pixels.
    pub padding: u32,
}

impl Default for TitleStyle {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 240,
            font_family: "sans-serif".to_owned(),
            font_file: None,
            font_size: 72.0,
            min_font_size: 18.0,
            color: Rgba8::WHITE,
            background: TitleBackground::Transparent,
            opacity: 1.0,
            decoration: TitleDecoration::None,
            padding: 40,
        }
    }
}

impl TitleStyle {
    pub fn validate(&self) -> SupercutResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(SupercutError::validation(
                "title canvas width/height must be non-zero",
            ));
        }
        if self.padding.saturating_mul(2) >= self.width {
            return Err(SupercutError::validation(format!(
                "title padding {} leaves no room on a {}px canvas",
                self.padding, self.width
            )));
        }
        if !self.min_font_size.is_finite() || self.min_font_size <= 0.0 {
            return Err(SupercutError::validation("title min_font_size must be > 0"));
        }
        if !self.font_size.is_finite() || self.font_size < self.min_font_size {
            return Err(SupercutError::validation(
                "title font_size must be >= min_font_size",
            ));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(SupercutError::validation(
                "title opacity must be within [0, 1]",
            ));
        }
        Ok(())
    }

    fn max_text_width(&self) -> f32 {
        self.width.saturating_sub(self.padding * 2) as f32
    }
}

/// Text and size chosen for a title after the overflow policy ran.
#[derive(Clone, Debug, PartialEq)]
pub struct FittedTitle {
    pub text: String,
    pub font_size: f32,
    pub truncated: bool,
}

/// Apply the overflow policy: shrink the font toward `min_font_size`, then cut the text and
/// append an ellipsis. `measure(text, size)` returns the rendered width in pixels.
pub fn fit_title(title: &str, style: &TitleStyle, measure: impl Fn(&str, f32) -> f32) -> FittedTitle {
    let max_w = style.max_text_width();
    let floor = style.min_font_size;
    let mut size = style.font_size.min(style.height as f32 * 0.8).max(floor);

    loop {
        if measure(title, size) <= max_w {
            return FittedTitle {
                text: title.to_owned(),
                font_size: size,
                truncated: false,
            };
        }
        if size <= floor {
            break;
        }
        size = (size - SHRINK_STEP_PX).max(floor);
    }

    let chars: Vec<char> = title.chars().collect();
    let candidate = |n: usize| -> String {
        let mut s: String = chars[..n].iter().collect();
        s.truncate(s.trim_end().len());
        s.push(ELLIPSIS);
        s
    };

    // Width grows with prefix length, so the longest fitting prefix can be bisected.
    let (mut lo, mut hi) = (0usize, chars.len());
    while lo < hi {
        let mid = (lo + hi).div_ceil(2);
        if measure(&candidate(mid), size) <= max_w {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }

    FittedTitle {
        text: candidate(lo),
        font_size: size,
        truncated: true,
    }
}

/// A rendered title: straight-alpha RGBA8 pixels.
#[derive(Clone, Debug)]
pub struct TitleImage {
    pub width: u32,
    pub height: u32,
    pub rgba8: Vec<u8>,
    pub fitted: FittedTitle,
}

impl TitleImage {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y * self.width + x) * 4) as usize;
        self.rgba8.get(i..i + 4).map(|p| [p[0], p[1], p[2], p[3]])
    }

    pub fn write_png(&self, path: &Path) -> SupercutResult<()> {
        let img = image::RgbaImage::from_raw(self.width, self.height, self.rgba8.clone())
            .ok_or_else(|| SupercutError::rasterization("title buffer size mismatch"))?;
        img.save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| {
                SupercutError::rasterization(format!(
                    "failed to write title png '{}': {e}",
                    path.display()
                ))
            })
    }
}

/// Renders song titles onto a fixed canvas. Cheap to share across jobs.
#[derive(Clone)]
pub struct TitleRasterizer {
    fontdb: Arc<usvg::fontdb::Database>,
    family: String,
    style: TitleStyle,
}

impl std::fmt::Debug for TitleRasterizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TitleRasterizer")
            .field("faces", &self.fontdb.len())
            .field("family", &self.family)
            .field("style", &self.style)
            .finish()
    }
}

impl TitleRasterizer {
    /// Load system fonts plus the style's font file.
    pub fn new(style: TitleStyle) -> SupercutResult<Self> {
        style.validate()?;

        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        pin_sans_serif_family(&mut db);

        let mut family = style.font_family.clone();
        if let Some(path) = style.font_file.as_deref() {
            family = load_font_file(&mut db, path)?;
        }
        tracing::debug!(faces = db.len(), family = %family, "title font database ready");

        Ok(Self {
            fontdb: Arc::new(db),
            family,
            style,
        })
    }

    pub fn style(&self) -> &TitleStyle {
        &self.style
    }

    /// Rendered width of `text` at `font_size`.
    ///
    /// Fails when no loaded font can draw the text.
    pub fn measure(&self, text: &str, font_size: f32) -> SupercutResult<f32> {
        if text.trim().is_empty() {
            return Ok(0.0);
        }
        let svg = self.text_svg(text, font_size, false);
        let tree = usvg::Tree::from_str(&svg, &self.options())
            .map_err(|e| SupercutError::rasterization(format!("title svg parse failed: {e}")))?;
        if !has_text(tree.root()) {
            return Err(self.no_glyphs(text));
        }
        Ok(tree.root().abs_bounding_box().width())
    }

    #[tracing::instrument(skip(self))]
    pub fn render(&self, title: &str) -> SupercutResult<TitleImage> {
        self.measure(title, self.style.font_size)?;
        let fitted = fit_title(title, &self.style, |t, s| {
            self.measure(t, s).unwrap_or(f32::INFINITY)
        });
        if fitted.truncated {
            tracing::info!(shown = %fitted.text, "title truncated to fit");
        }

        let svg = self.text_svg(&fitted.text, fitted.font_size, true);
        let tree = usvg::Tree::from_str(&svg, &self.options())
            .map_err(|e| SupercutError::rasterization(format!("title svg parse failed: {e}")))?;
        if !fitted.text.trim().is_empty() && !has_text(tree.root()) {
            return Err(self.no_glyphs(&fitted.text));
        }

        let mut pixmap = resvg::tiny_skia::Pixmap::new(self.style.width, self.style.height)
            .ok_or_else(|| SupercutError::rasterization("failed to allocate title pixmap"))?;
        resvg::render(
            &tree,
            resvg::tiny_skia::Transform::identity(),
            &mut pixmap.as_mut(),
        );

        let mut rgba8 = pixmap.take();
        unpremultiply_rgba8_in_place(&mut rgba8);
        Ok(TitleImage {
            width: self.style.width,
            height: self.style.height,
            rgba8,
            fitted,
        })
    }

    pub fn render_to_file(&self, title: &str, path: &Path) -> SupercutResult<TitleImage> {
        let img = self.render(title)?;
        img.write_png(path)?;
        Ok(img)
    }

    fn options(&self) -> usvg::Options<'static> {
        usvg::Options {
            fontdb: Arc::clone(&self.fontdb),
            font_resolver: font_resolver(),
            ..Default::default()
        }
    }

    fn no_glyphs(&self, text: &str) -> SupercutError {
        SupercutError::rasterization(format!(
            "no loaded font can draw '{text}' (family '{}', {} faces)",
            self.family,
            self.fontdb.len()
        ))
    }

    fn text_svg(&self, text: &str, font_size: f32, full: bool) -> String {
        let s = &self.style;
        let (w, h) = (s.width, s.height);
        let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
        let text = escape_xml(text);
        let family = if self.family.contains(' ') {
            escape_xml(&format!("'{}'", self.family))
        } else {
            escape_xml(&self.family)
        };

        let mut svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#
        );
        if full && let TitleBackground::Solid { color } = s.background {
            let _ = write!(
                svg,
                r#"<rect x="0" y="0" width="{w}" height="{h}" fill="{}" fill-opacity="{}"/>"#,
                color.hex_rgb(),
                color.alpha_f32()
            );
        }
        let _ = write!(svg, r#"<g opacity="{}">"#, if full { s.opacity } else { 1.0 });

        let text_attrs = format!(
            r#"font-family="{family}" font-size="{font_size}" text-anchor="middle" dominant-baseline="central""#
        );
        if full && s.decoration == TitleDecoration::Shadow {
            let off = (font_size / 24.0).max(1.0);
            let _ = write!(
                svg,
                r##"<text x="{}" y="{}" {text_attrs} fill="#000000" fill-opacity="0.6">{text}</text>"##,
                cx + off,
                cy + off
            );
        }
        let stroke = if full && s.decoration == TitleDecoration::Outline {
            format!(
                r##" stroke="#000000" stroke-width="{}" stroke-linejoin="round" paint-order="stroke""##,
                (font_size / 16.0).max(1.0)
            )
        } else {
            String::new()
        };
        let _ = write!(
            svg,
            r#"<text x="{cx}" y="{cy}" {text_attrs} fill="{}" fill-opacity="{}"{stroke}>{text}</text></g></svg>"#,
            s.color.hex_rgb(),
            s.color.alpha_f32()
        );
        svg
    }
}

fn load_font_file(db: &mut usvg::fontdb::Database, path: &Path) -> SupercutResult<String> {
    let data = std::fs::read(path).map_err(|e| {
        SupercutError::rasterization(format!("read font '{}': {e}", path.display()))
    })?;

    let mut scan = usvg::fontdb::Database::new();
    scan.load_font_data(data.clone());
    let family = scan
        .faces()
        .find_map(|face| face.families.first().map(|(name, _)| name.clone()))
        .ok_or_else(|| {
            SupercutError::rasterization(format!(
                "font file '{}' contains no usable faces",
                path.display()
            ))
        })?;

    db.load_font_data(data);
    Ok(family)
}

/// Point the generic sans-serif family at an installed face.
fn pin_sans_serif_family(db: &mut usvg::fontdb::Database) {
    let chosen = SANS_SERIF_CANDIDATES
        .iter()
        .find(|name| has_family(db, name))
        .map(|name| (*name).to_owned())
        .or_else(|| {
            db.faces()
                .find_map(|face| face.families.first().map(|(name, _)| name.clone()))
        });
    match chosen {
        Some(name) => {
            tracing::debug!(family = %name, "sans-serif family");
            db.set_sans_serif_family(name);
        }
        None => tracing::warn!("no fonts loaded; titles cannot be drawn"),
    }
}

fn has_family(db: &usvg::fontdb::Database, name: &str) -> bool {
    db.faces()
        .any(|face| face.families.iter().any(|(family, _)| family == name))
}

/// Requested families first, then the generic families, then any face at all.
fn font_resolver() -> usvg::FontResolver<'static> {
    usvg::FontResolver {
        select_font: Box::new(|font, fontdb| {
            let mut families: Vec<usvg::fontdb::Family<'_>> = font
                .families()
                .iter()
                .map(|family| match family {
                    usvg::FontFamily::Serif => usvg::fontdb::Family::Serif,
                    usvg::FontFamily::SansSerif => usvg::fontdb::Family::SansSerif,
                    usvg::FontFamily::Cursive => usvg::fontdb::Family::Cursive,
                    usvg::FontFamily::Fantasy => usvg::fontdb::Family::Fantasy,
                    usvg::FontFamily::Monospace => usvg::fontdb::Family::Monospace,
                    usvg::FontFamily::Named(name) => usvg::fontdb::Family::Name(name),
                })
                .collect();
            families.extend([
                usvg::fontdb::Family::SansSerif,
                usvg::fontdb::Family::Serif,
                usvg::fontdb::Family::Monospace,
            ]);

            let style = match font.style() {
                usvg::FontStyle::Normal => usvg::fontdb::Style::Normal,
                usvg::FontStyle::Italic => usvg::fontdb::Style::Italic,
                usvg::FontStyle::Oblique => usvg::fontdb::Style::Oblique,
            };
            let query = usvg::fontdb::Query {
                families: &families,
                weight: usvg::fontdb::Weight(font.weight()),
                stretch: usvg::fontdb::Stretch::Normal,
                style,
            };
            fontdb
                .query(&query)
                .or_else(|| fontdb.faces().next().map(|face| face.id))
        }),
        select_fallback: usvg::FontResolver::default_fallback_selector(),
    }
}

fn has_text(group: &usvg::Group) -> bool {
    group.children().iter().any(|node| match node {
        usvg::Node::Text(_) => true,
        usvg::Node::Group(g) => has_text(g),
        _ => false,
    })
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if c.is_control() => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

fn unpremultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        if a == 255 {
            continue;
        }
        for c in &mut px[..3] {
            *c = ((*c as u16 * 255 + a / 2) / a).min(255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style(width: u32) -> TitleStyle {
        TitleStyle {
            width,
            height: 60,
            font_size: 40.0,
            min_font_size: 20.0,
            padding: 10,
            ..TitleStyle::default()
        }
    }

    // Half the font size per character.
    fn mono(text: &str, size: f32) -> f32 {
        text.chars().count() as f32 * size * 0.5
    }

    #[test]
    fn short_titles_keep_requested_size() {
        let fitted = fit_title("Hello", &style(400), mono);
        assert_eq!(fitted.text, "Hello");
        assert_eq!(fitted.font_size, 40.0);
        assert!(!fitted.truncated);
    }

    #[test]
    fn long_titles_shrink_before_truncating() {
        // 400px wide at 40px, exactly 380px at 38px.
        let fitted = fit_title("abcdefghijklmnopqrst", &style(400), mono);
        assert!(!fitted.truncated);
        assert!(fitted.font_size < 40.0);
        assert!(mono(&fitted.text, fitted.font_size) <= 380.0);
    }

    #[test]
    fn very_long_titles_truncate_with_ellipsis_at_min_size() {
        let title = "x".repeat(200);
        let fitted = fit_title(&title, &style(400), mono);
        assert!(fitted.truncated);
        assert_eq!(fitted.font_size, 20.0);
        assert!(fitted.text.ends_with(ELLIPSIS));
        assert!(mono(&fitted.text, 20.0) <= 380.0);
        // One more character would overflow.
        assert!(mono(&format!("x{}", fitted.text), 20.0) > 380.0);
    }

    #[test]
    fn truncation_trims_trailing_space_before_ellipsis() {
        let fitted = fit_title(&"ab ".repeat(100), &style(120), mono);
        assert!(fitted.truncated);
        assert!(!fitted.text.contains(" \u{2026}"));
    }

    #[test]
    fn style_validation() {
        assert!(TitleStyle::default().validate().is_ok());
        let mut s = TitleStyle::default();
        s.opacity = 1.5;
        assert!(s.validate().is_err());
        let mut s = TitleStyle::default();
        s.font_size = 10.0;
        assert!(s.validate().is_err());
        let mut s = TitleStyle::default();
        s.padding = 960;
        assert!(s.validate().is_err());
    }

    #[test]
    fn xml_is_escaped() {
        assert_eq!(escape_xml("R&B <\"live\">"), "R&amp;B &lt;&quot;live&quot;&gt;");
    }

    #[test]
    fn render_has_canvas_size_and_solid_background() {
        let mut s = style(200);
        s.background = TitleBackground::Solid {
            color: Rgba8::rgb(255, 0, 0),
        };
        let r = TitleRasterizer::new(s).unwrap();
        let img = r.render("Hi").unwrap();
        assert_eq!((img.width, img.height), (200, 60));
        assert_eq!(img.rgba8.len(), 200 * 60 * 4);
        assert_eq!(img.pixel(0, 0), Some([255, 0, 0, 255]));
        assert_eq!(img.pixel(200, 0), None);
    }

    #[test]
    fn transparent_background_leaves_corners_clear() {
        let r = TitleRasterizer::new(style(200)).unwrap();
        let img = r.render("A title that is long enough to need shrinking").unwrap();
        assert_eq!(img.pixel(0, 0).map(|p| p[3]), Some(0));
        assert_eq!(img.pixel(199, 59).map(|p| p[3]), Some(0));
    }

    fn inked(img: &TitleImage) -> usize {
        img.rgba8.chunks_exact(4).filter(|p| p[3] > 0).count()
    }

    #[test]
    fn default_style_draws_visible_glyphs() {
        let r = TitleRasterizer::new(TitleStyle::default()).unwrap();
        assert!(r.measure("Midnight City", 72.0).unwrap() > 0.0);

        let img = r.render("Midnight City").unwrap();
        assert!(!img.fitted.truncated);
        assert!(inked(&img) > 0);
        // Glyphs sit in the vertical middle of the card.
        let centre_row: usize = (0..img.width)
            .filter(|&x| img.pixel(x, img.height / 2).is_some_and(|p| p[3] > 0))
            .count();
        assert!(centre_row > 0);
    }

    #[test]
    fn overlong_title_is_truncated_at_min_size() {
        let r = TitleRasterizer::new(TitleStyle::default()).unwrap();
        let title = "Midnight City ".repeat(60);
        let img = r.render(&title).unwrap();

        assert!(img.fitted.truncated);
        assert_eq!(img.fitted.font_size, 18.0);
        assert!(img.fitted.text.ends_with(ELLIPSIS));
        assert!(img.fitted.text.chars().count() < title.chars().count());
        let width = r.measure(&img.fitted.text, 18.0).unwrap();
        assert!(width <= 1840.0, "{width}");
        assert!(inked(&img) > 0);
    }

    #[test]
    fn empty_font_database_is_a_rasterization_error() {
        let r = TitleRasterizer {
            fontdb: Arc::new(usvg::fontdb::Database::new()),
            family: "sans-serif".to_owned(),
            style: TitleStyle::default(),
        };
        let err = r.render("Midnight City").unwrap_err();
        assert!(matches!(err, SupercutError::Rasterization(_)), "{err}");
        assert!(r.measure("Midnight City", 72.0).is_err());
    }

    #[test]
    fn missing_font_file_is_a_rasterization_error() {
        let s = TitleStyle {
            font_file: Some(std::env::temp_dir().join("supercut_no_such_font.ttf")),
            ..TitleStyle::default()
        };
        let err = TitleRasterizer::new(s).unwrap_err();
        assert!(matches!(err, SupercutError::Rasterization(_)), "{err}");
    }

    #[test]
    fn unusable_font_file_is_a_rasterization_error() {
        let path = std::env::temp_dir().join(format!("supercut_bad_font_{}.ttf", std::process::id()));
        std::fs::write(&path, b"not a font").unwrap();
        let s = TitleStyle {
            font_file: Some(path.clone()),
            ..TitleStyle::default()
        };
        let err = TitleRasterizer::new(s).unwrap_err();
        assert!(matches!(err, SupercutError::Rasterization(_)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn unpremultiply_restores_straight_alpha() {
        let mut px = vec![64u8, 32, 0, 128, 9, 9, 9, 0];
        unpremultiply_rgba8_in_place(&mut px);
        assert_eq!(&px[..4], &[128, 64, 0, 128]);
        assert_eq!(&px[4..], &[0, 0, 0, 0]);
    }
}
