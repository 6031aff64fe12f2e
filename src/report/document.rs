use std::fmt::Write;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const PAGE_BREAK: &str = "<div style=\"page-break-after: always\"></div>";
const IMAGE_LINES: usize = 24;

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading(String),
    Text(String),
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Image {
        alt: String,
        width: u32,
        height: u32,
        png: Vec<u8>,
    },
    Placeholder(String),
}

impl Block {
    /// Rough vertical size, in text lines, used to break pages.
    fn line_cost(&self) -> usize {
        match self {
            Block::Heading(_) => 2,
            Block::Text(text) => text.lines().count().max(1) + 1,
            Block::Table { rows, .. } => rows.len() + 3,
            Block::Image { .. } => IMAGE_LINES,
            Block::Placeholder(_) => 2,
        }
    }

    fn render(&self, out: &mut String) {
        match self {
            Block::Heading(text) => {
                let _ = writeln!(out, "## {text}");
            }
            Block::Text(text) => {
                let _ = writeln!(out, "{text}");
            }
            Block::Table { headers, rows } => {
                let _ = writeln!(out, "| {} |", escape_cells(headers).join(" | "));
                let _ = writeln!(out, "|{}", " --- |".repeat(headers.len()));
                for row in rows {
                    let _ = writeln!(out, "| {} |", escape_cells(row).join(" | "));
                }
            }
            Block::Image {
                alt,
                width,
                height,
                png,
            } => {
                let _ = writeln!(
                    out,
                    "![{alt} ({width}x{height})](data:image/png;base64,{})",
                    STANDARD.encode(png)
                );
            }
            Block::Placeholder(text) => {
                let _ = writeln!(out, "> _{text}_");
            }
        }
    }
}

fn escape_cells(cells: &[String]) -> Vec<String> {
    cells.iter().map(|cell| cell.replace('|', "\\|")).collect()
}

/// A paginated report rendered to Markdown. Pages are separated by an
/// explicit page-break element and each carries the footer and its number.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportDocument {
    title: String,
    blocks: Vec<Block>,
    footer: Option<String>,
    lines_per_page: usize,
}

impl ReportDocument {
    pub fn new(title: impl Into<String>, lines_per_page: usize) -> Self {
        Self {
            title: title.into(),
            blocks: Vec::new(),
            footer: None,
            lines_per_page: lines_per_page.max(IMAGE_LINES),
        }
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn set_footer(&mut self, footer: impl Into<String>) {
        self.footer = Some(footer.into());
    }

    /// Blocks are never split; a block that does not fit starts a new page.
    pub fn paginate(&self) -> Vec<Vec<&Block>> {
        let mut pages: Vec<Vec<&Block>> = vec![Vec::new()];
        let mut used = 2; // title

        for block in &self.blocks {
            let cost = block.line_cost();
            let current_is_empty = pages.last().map_or(true, Vec::is_empty);
            if used + cost > self.lines_per_page && !current_is_empty {
                pages.push(Vec::new());
                used = 0;
            }
            if let Some(page) = pages.last_mut() {
                page.push(block);
            }
            used += cost;
        }

        pages
    }

    pub fn render_markdown(&self) -> String {
        let pages = self.paginate();
        let total = pages.len();
        let mut output = String::new();

        let _ = writeln!(output, "# {}", self.title);
        let _ = writeln!(output);

        for (index, page) in pages.iter().enumerate() {
            for block in page {
                block.render(&mut output);
                let _ = writeln!(output);
            }

            let number = index + 1;
            match &self.footer {
                Some(footer) => {
                    let _ = writeln!(output, "_{footer} | Page {number} of {total}_");
                }
                None => {
                    let _ = writeln!(output, "_Page {number} of {total}_");
                }
            }

            if number < total {
                let _ = writeln!(output);
                let _ = writeln!(output, "{PAGE_BREAK}");
                let _ = writeln!(output);
            }
        }

        output
    }
}
