use std::fs;
use std::path::{Path, PathBuf};

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::{debug, info};

use crate::error::RenderError;
use crate::metrics::GradePoint;
use crate::models::Period;
use crate::render::chart::{TrendChart, DRAWING_HEIGHT, PLOT_HEIGHT, PLOT_WIDTH, PLOT_X, PLOT_Y};

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 40;
const LOGO_HEIGHT: i64 = 50;
const ROW_HEIGHT: i64 = 16;
const LINE_HEIGHT: i64 = 12;
const FOOTER_SPACE: i64 = 40;

const COLUMNS: [(&str, i64); 7] = [
    ("S/N", 40),
    ("ID NO.", 70),
    ("FULL NAME", 150),
    ("TOTAL", 330),
    ("GRADE", 380),
    ("POINT", 430),
    ("COMMENT", 480),
];

/// One student line of a result sheet plus the insight shown under it.
#[derive(Debug, Clone)]
pub struct ResultRow {
    pub student_no: String,
    pub full_name: String,
    pub total: f64,
    pub grade: GradePoint,
    pub learning_style: String,
    pub trend: String,
    pub recommendation: String,
    pub chart: TrendChart,
}

impl ResultRow {
    fn height(&self) -> i64 {
        let chart = if self.chart.is_empty() { 0 } else { DRAWING_HEIGHT };
        ROW_HEIGHT + 3 * LINE_HEIGHT + chart + 8
    }
}

#[derive(Debug, Clone)]
pub struct ResultSheet {
    pub period: Period,
    pub course: String,
    pub lecturer: String,
    pub level: String,
    pub rows: Vec<ResultRow>,
}

impl ResultSheet {
    /// "<SEMESTER> SEMESTER <SESSION> RESULT SHEET"
    pub fn title(&self) -> String {
        format!(
            "{} SEMESTER {} RESULT SHEET",
            self.period.semester.to_uppercase(),
            self.period.academic_year
        )
    }

    pub fn passed(&self) -> usize {
        self.rows.iter().filter(|r| r.grade.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.rows.len() - self.passed()
    }
}

#[derive(Debug, Clone)]
pub struct RenderedSheet {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// `<semester>_semester_<session>_<course>_resultSheet.pdf` with every `/` removed.
pub fn result_sheet_file_name(semester: &str, session: &str, course: &str) -> String {
    format!("{semester}_semester_{session}_{course}_resultSheet.pdf").replace('/', "")
}

/// A baseline or progressive JPEG ready to embed as a DCTDecode image.
#[derive(Debug, Clone)]
pub struct Logo {
    bytes: Vec<u8>,
    width: i64,
    height: i64,
    components: u8,
}

impl Logo {
    pub fn from_jpeg(bytes: Vec<u8>) -> Result<Self, RenderError> {
        let (width, height, components) = jpeg_dimensions(&bytes)
            .ok_or_else(|| RenderError::Image("not a readable JPEG".to_string()))?;
        if width == 0 || height == 0 {
            return Err(RenderError::Image("JPEG has no pixels".to_string()));
        }
        Ok(Logo {
            bytes,
            width: width as i64,
            height: height as i64,
            components,
        })
    }

    pub fn load(path: &Path) -> Result<Self, RenderError> {
        Self::from_jpeg(fs::read(path)?)
    }

    fn color_space(&self) -> &'static str {
        match self.components {
            1 => "DeviceGray",
            4 => "DeviceCMYK",
            _ => "DeviceRGB",
        }
    }
}

/// Width, height and colour component count from the first SOF segment.
pub fn jpeg_dimensions(bytes: &[u8]) -> Option<(u16, u16, u8)> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
        return None;
    }

    let mut i = 2;
    while i + 3 < bytes.len() {
        if bytes[i] != 0xFF {
            return None;
        }
        let marker = bytes[i + 1];
        match marker {
            0xFF => {
                i += 1;
                continue;
            }
            0x01 | 0xD0..=0xD8 => {
                i += 2;
                continue;
            }
            _ => {}
        }

        let length = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            if i + 9 >= bytes.len() {
                return None;
            }
            let height = u16::from_be_bytes([bytes[i + 5], bytes[i + 6]]);
            let width = u16::from_be_bytes([bytes[i + 7], bytes[i + 8]]);
            return Some((width, height, bytes[i + 9]));
        }
        i += 2 + length;
    }
    None
}

/// Base letters for U+0100..=U+017F (Latin Extended-A), used when a
/// character has no WinAnsi code of its own.
const LATIN_EXTENDED_A: &[u8; 128] = b"AaAaAaCcCcCcCcDdDdEeEeEeEeEeGgGgGgGgHhHhIiIiIiIiIiIiJjKkkLlLlLlLlLlNnNnNnnNnOoOoOoOoRrRrRrSsSsSsSsTtTtTtUuUuUuUuUuUuWwYyYZzZzZzs";

/// Encodes text for the standard Type1 fonts (`WinAnsiEncoding`). Accented
/// letters outside the code page lose their accent; anything else becomes `?`.
pub fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            code @ (0x20..=0x7E | 0xA0..=0xFF) => code as u8,
            0x20AC => 0x80,
            0x201A => 0x82,
            0x0192 => 0x83,
            0x201E => 0x84,
            0x2026 => 0x85,
            0x2020 => 0x86,
            0x2021 => 0x87,
            0x02C6 => 0x88,
            0x2030 => 0x89,
            0x0160 => 0x8A,
            0x2039 => 0x8B,
            0x0152 => 0x8C,
            0x017D => 0x8E,
            0x2018 => 0x91,
            0x2019 => 0x92,
            0x201C => 0x93,
            0x201D => 0x94,
            0x2022 => 0x95,
            0x2013 => 0x96,
            0x2014 => 0x97,
            0x02DC => 0x98,
            0x2122 => 0x99,
            0x0161 => 0x9A,
            0x203A => 0x9B,
            0x0153 => 0x9C,
            0x017E => 0x9E,
            0x0178 => 0x9F,
            code @ 0x0100..=0x017F => LATIN_EXTENDED_A[(code - 0x0100) as usize],
            _ => b'?',
        })
        .collect()
}

fn int(value: i64) -> Object {
    Object::Integer(value)
}

fn name(value: &str) -> Object {
    Object::Name(value.as_bytes().to_vec())
}

struct Page {
    ops: Vec<Operation>,
    cursor: i64,
}

impl Page {
    fn text(&mut self, font: &str, size: i64, x: i64, y: i64, text: &str) {
        self.ops.push(Operation::new("BT", vec![]));
        self.ops.push(Operation::new("Tf", vec![name(font), int(size)]));
        self.ops.push(Operation::new("Td", vec![int(x), int(y)]));
        self.ops
            .push(Operation::new("Tj", vec![Object::String(win_ansi(text), StringFormat::Literal)]));
        self.ops.push(Operation::new("ET", vec![]));
    }

    fn fill_color(&mut self, rgb: [i64; 3]) {
        self.ops
            .push(Operation::new("rg", rgb.iter().copied().map(int).collect()));
    }

    fn stroke_color(&mut self, rgb: [i64; 3]) {
        self.ops
            .push(Operation::new("RG", rgb.iter().copied().map(int).collect()));
    }

    fn line(&mut self, from: (i64, i64), to: (i64, i64)) {
        self.ops.push(Operation::new("m", vec![int(from.0), int(from.1)]));
        self.ops.push(Operation::new("l", vec![int(to.0), int(to.1)]));
        self.ops.push(Operation::new("S", vec![]));
    }

    fn polyline(&mut self, points: &[(i64, i64)]) {
        let Some((first, rest)) = points.split_first() else {
            return;
        };
        self.ops
            .push(Operation::new("m", vec![int(first.0), int(first.1)]));
        for point in rest {
            self.ops.push(Operation::new("l", vec![int(point.0), int(point.1)]));
        }
        self.ops.push(Operation::new("S", vec![]));
    }

    fn image(&mut self, resource: &str, x: i64, y: i64, width: i64, height: i64) {
        self.ops.push(Operation::new("q", vec![]));
        self.ops.push(Operation::new(
            "cm",
            vec![int(width), int(0), int(0), int(height), int(x), int(y)],
        ));
        self.ops.push(Operation::new("Do", vec![name(resource)]));
        self.ops.push(Operation::new("Q", vec![]));
    }
}

const BLACK: [i64; 3] = [0, 0, 0];
const RED: [i64; 3] = [1, 0, 0];

/// Lays out result sheets as A4 pages with Helvetica text.
#[derive(Debug, Clone, Default)]
pub struct PdfRenderer {
    logo: Option<Logo>,
}

impl PdfRenderer {
    pub fn new(logo: Option<Logo>) -> Self {
        Self { logo }
    }

    pub fn render(&self, sheet: &ResultSheet) -> Result<Vec<u8>, RenderError> {
        let pages = self.layout(sheet);
        debug!(pages = pages.len(), rows = sheet.rows.len(), "laid out result sheet");

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let regular = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });

        let mut resources = dictionary! {
            "Font" => dictionary! {
                "F1" => regular,
                "F2" => bold,
            },
        };
        if let Some(logo) = &self.logo {
            let image = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => logo.width,
                    "Height" => logo.height,
                    "ColorSpace" => logo.color_space(),
                    "BitsPerComponent" => int(8),
                    "Filter" => "DCTDecode",
                },
                logo.bytes.clone(),
            );
            let image_id = doc.add_object(image);
            resources.set("XObject", dictionary! { "Im1" => image_id });
        }
        let resources_id = doc.add_object(resources);

        let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
        for page in pages {
            let content = Content {
                operations: page.ops,
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
            let page_id: ObjectId = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![int(0), int(0), int(PAGE_WIDTH), int(PAGE_HEIGHT)],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)
            .map_err(|e| RenderError::Pdf(e.to_string()))?;
        Ok(bytes)
    }

    /// Renders the sheet into `<media_root>/result_sheet/`.
    pub fn write(
        &self,
        sheet: &ResultSheet,
        media_root: &Path,
        course: &str,
    ) -> Result<RenderedSheet, RenderError> {
        let bytes = self.render(sheet)?;
        let dir = media_root.join("result_sheet");
        fs::create_dir_all(&dir)?;

        let path = dir.join(result_sheet_file_name(
            &sheet.period.semester,
            &sheet.period.academic_year,
            course,
        ));
        fs::write(&path, &bytes)?;
        info!(path = %path.display(), bytes = bytes.len(), "wrote result sheet");
        Ok(RenderedSheet { path, bytes })
    }

    fn layout(&self, sheet: &ResultSheet) -> Vec<Page> {
        let mut pages = vec![self.start_page(sheet)];

        for (index, row) in sheet.rows.iter().enumerate() {
            let fits = pages
                .last()
                .map(|page| page.cursor - row.height() >= MARGIN + FOOTER_SPACE)
                .unwrap_or(false);
            if !fits {
                pages.push(self.start_page(sheet));
            }
            if let Some(page) = pages.last_mut() {
                draw_row(page, index + 1, row);
            }
        }

        if let Some(page) = pages.last_mut() {
            let y = (page.cursor - ROW_HEIGHT).max(MARGIN);
            page.line((MARGIN, y + ROW_HEIGHT - 4), (PAGE_WIDTH - MARGIN, y + ROW_HEIGHT - 4));
            let footer = format!(
                "Total students: {}    Passed: {}    Failed: {}",
                sheet.rows.len(),
                sheet.passed(),
                sheet.failed()
            );
            page.text("F2", 10, MARGIN, y, &footer);
        }
        pages
    }

    fn start_page(&self, sheet: &ResultSheet) -> Page {
        let mut page = Page {
            ops: Vec::new(),
            cursor: PAGE_HEIGHT - MARGIN,
        };

        if let Some(logo) = &self.logo {
            let width = logo.width * LOGO_HEIGHT / logo.height;
            let x = (PAGE_WIDTH - width) / 2;
            page.image("Im1", x, page.cursor - LOGO_HEIGHT, width, LOGO_HEIGHT);
            page.cursor -= LOGO_HEIGHT + 10;
        }

        let title = sheet.title();
        let approx_width = title.len() as i64 * 7;
        page.text("F2", 14, ((PAGE_WIDTH - approx_width) / 2).max(MARGIN), page.cursor - 14, &title);
        page.cursor -= 30;

        page.text("F1", 10, MARGIN, page.cursor, &format!("Course: {}", sheet.course));
        page.cursor -= LINE_HEIGHT + 2;
        page.text(
            "F1",
            10,
            MARGIN,
            page.cursor,
            &format!("Course lecturer: {}", sheet.lecturer),
        );
        page.text("F1", 10, 380, page.cursor, &format!("Level: {}", sheet.level));
        page.cursor -= ROW_HEIGHT + 4;

        for (label, x) in COLUMNS {
            page.text("F2", 9, x, page.cursor, label);
        }
        page.line((MARGIN, page.cursor - 4), (PAGE_WIDTH - MARGIN, page.cursor - 4));
        page.cursor -= ROW_HEIGHT;
        page
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max.saturating_sub(3)).collect::<String>() + "..."
    }
}

fn draw_row(page: &mut Page, serial: usize, row: &ResultRow) {
    let failed = !row.grade.passed();
    if failed {
        page.fill_color(RED);
    }
    let cells = [
        serial.to_string(),
        truncate(&row.student_no, 14),
        truncate(&row.full_name, 32),
        format!("{:.1}", row.total),
        row.grade.grade.to_string(),
        format!("{:.2}", row.grade.point),
        row.grade.comment().to_string(),
    ];
    for ((_, x), cell) in COLUMNS.iter().zip(cells.iter()) {
        page.text("F1", 9, *x, page.cursor, cell);
    }
    if failed {
        page.fill_color(BLACK);
    }
    page.cursor -= ROW_HEIGHT;

    let x = COLUMNS[2].1;
    for line in [
        format!("Learning style: {}", row.learning_style),
        format!("Trend: {}", row.trend),
        format!("Recommendation: {}", truncate(&row.recommendation, 80)),
    ] {
        page.text("F1", 8, x, page.cursor, &line);
        page.cursor -= LINE_HEIGHT;
    }

    if !row.chart.is_empty() {
        let origin = (MARGIN + 60, page.cursor - DRAWING_HEIGHT);
        draw_chart(page, origin, &row.chart);
        page.cursor -= DRAWING_HEIGHT;
    }
    page.cursor -= 8;
}

fn draw_chart(page: &mut Page, (ox, oy): (i64, i64), chart: &TrendChart) {
    let at = move |(x, y): (i64, i64)| (ox + x, oy + y);

    page.stroke_color(BLACK);
    page.line(at((PLOT_X, PLOT_Y)), at((PLOT_X + PLOT_WIDTH, PLOT_Y)));
    page.line(at((PLOT_X, PLOT_Y)), at((PLOT_X, PLOT_Y + PLOT_HEIGHT)));
    for (value, offset) in [("0", 0), ("50", PLOT_HEIGHT / 2), ("100", PLOT_HEIGHT)] {
        let (x, y) = at((PLOT_X - 22, PLOT_Y + offset - 3));
        page.text("F1", 7, x, y, value);
    }
    for (label, point) in chart.labels.iter().zip(chart.points.iter()) {
        let (x, y) = at((point.0 - 12, PLOT_Y - 14));
        page.text("F1", 7, x, y, label);
    }

    let points: Vec<(i64, i64)> = chart.points.iter().copied().map(at).collect();
    page.polyline(&points);

    if let Some(overlay) = &chart.overlay {
        page.stroke_color(overlay.color.rgb());
        page.line(at(overlay.from), at(overlay.to));
        page.stroke_color(BLACK);
    }
}
