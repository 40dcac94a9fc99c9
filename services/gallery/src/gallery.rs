//! In-memory gallery and page rendering

use crate::identity::SessionUser;
use crate::metadata_store::PhotoRecord;
use std::fmt::Write;

/// Columns used above every breakpoint
pub const DEFAULT_COLUMNS: usize = 5;

/// Masonry breakpoints: (max viewport width in px, columns), widest first
pub const BREAKPOINTS: [(u32, usize); 5] = [(1536, 4), (1280, 3), (1024, 3), (768, 2), (640, 1)];

/// Photos shown on the page, most recent first
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    photos: Vec<PhotoRecord>,
}

impl Gallery {
    /// Build from records already in most-recent-first order
    pub fn from_records(photos: Vec<PhotoRecord>) -> Self {
        Self { photos }
    }

    /// Add a freshly uploaded photo, keeping most-recent-first order
    ///
    /// Uploads that finish out of order still land by `(created_at, id)`,
    /// the same order `list_all` returns.
    pub fn prepend(&mut self, photo: PhotoRecord) {
        let key = (photo.created_at, photo.id);
        let index = self
            .photos
            .iter()
            .position(|existing| (existing.created_at, existing.id) < key)
            .unwrap_or(self.photos.len());
        self.photos.insert(index, photo);
    }

    pub fn photos(&self) -> &[PhotoRecord] {
        &self.photos
    }

    pub fn by_owner(&self, owner_id: &str) -> Vec<PhotoRecord> {
        self.photos
            .iter()
            .filter(|photo| photo.owner_id == owner_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }

    /// Distribute photos round-robin into `columns` columns
    pub fn layout(&self, columns: usize) -> Vec<Vec<&PhotoRecord>> {
        let columns = columns.max(1);
        let mut layout = vec![Vec::new(); columns];

        for (index, photo) in self.photos.iter().enumerate() {
            layout[index % columns].push(photo);
        }

        layout
    }
}

/// Number of masonry columns for a viewport width
pub fn column_count(width: u32) -> usize {
    BREAKPOINTS
        .iter()
        .rev()
        .find(|(max_width, _)| width <= *max_width)
        .map(|(_, columns)| *columns)
        .unwrap_or(DEFAULT_COLUMNS)
}

/// Distinct column counts, widest layout first
fn grid_columns() -> Vec<usize> {
    let mut counts = vec![DEFAULT_COLUMNS];
    for (_, columns) in BREAKPOINTS {
        if !counts.contains(&columns) {
            counts.push(columns);
        }
    }
    counts
}

/// Render the gallery page for the current visitor
pub fn render_page(gallery: &Gallery, user: Option<&SessionUser>) -> String {
    let mut html = String::with_capacity(4096 + gallery.len() * 256);

    html.push_str(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>Realist</title>\n<style>\n",
    );
    html.push_str(&masonry_css());
    html.push_str("</style>\n</head>\n<body>\n");

    render_header(&mut html, user);

    // one grid per column count; the media queries pick which one shows
    html.push_str("<main>\n");
    for columns in grid_columns() {
        let _ = writeln!(html, "<div class=\"masonry\" data-columns=\"{columns}\">");
        for column in gallery.layout(columns) {
            html.push_str("<div class=\"masonry-column\">\n");
            for photo in column {
                render_photo(&mut html, photo, user);
            }
            html.push_str("</div>\n");
        }
        html.push_str("</div>\n");
    }
    html.push_str("</main>\n");

    if user.is_some() {
        html.push_str(UPLOAD_SCRIPT);
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn masonry_css() -> String {
    let mut css = format!(
        "body {{ margin: 0; font-family: sans-serif; background: #fafafa; }}\n\
         header {{ display: flex; align-items: center; gap: 1rem; padding: 1rem; }}\n\
         header .brand {{ font-weight: bold; font-size: 1.5rem; margin-right: auto; }}\n\
         header img.avatar {{ width: 32px; height: 32px; border-radius: 50%; }}\n\
         .masonry {{ display: none; gap: 1rem; padding: 1rem; }}\n\
         .masonry[data-columns=\"{DEFAULT_COLUMNS}\"] {{ display: flex; }}\n\
         .masonry-column {{ flex: 1; min-width: 0; }}\n\
         .masonry figure {{ margin: 0 0 1rem; }}\n\
         .masonry img {{ width: 100%; display: block; border-radius: 4px; }}\n\
         .author {{ display: flex; align-items: center; gap: 0.5rem; }}\n\
         .author .avatar {{ width: 24px; height: 24px; border-radius: 50%; }}\n\
         .author .placeholder {{ display: inline-flex; align-items: center; justify-content: center; \
         background: #ccc; color: #fff; font-size: 0.75rem; }}\n"
    );

    // widest first so narrower queries win
    for (max_width, columns) in BREAKPOINTS {
        let _ = writeln!(
            css,
            "@media (max-width: {max_width}px) {{ .masonry {{ display: none; }} \
             .masonry[data-columns=\"{columns}\"] {{ display: flex; }} }}"
        );
    }

    css
}

fn render_header(html: &mut String, user: Option<&SessionUser>) {
    html.push_str("<header>\n<span class=\"brand\">Realist</span>\n");

    match user {
        Some(user) => {
            html.push_str(UPLOAD_FORM);
            if let Some(ref picture) = user.picture {
                let _ = writeln!(
                    html,
                    "<img class=\"avatar\" src=\"{}\" alt=\"\">",
                    escape_html(picture)
                );
            }
            let _ = writeln!(
                html,
                "<span class=\"user\">{}</span>\n<a href=\"/logout\">Sign out</a>",
                escape_html(&user.name)
            );
        }
        None => {
            html.push_str("<a href=\"/login\">Sign in</a>\n<a href=\"/signup\">Sign up</a>\n");
        }
    }

    html.push_str("</header>\n");
}

fn render_photo(html: &mut String, photo: &PhotoRecord, user: Option<&SessionUser>) {
    let _ = write!(
        html,
        "<figure>\n<img src=\"/images/{}\" alt=\"{}\" loading=\"lazy\">\n<figcaption>{}",
        photo.id,
        escape_html(&photo.title),
        escape_html(&photo.title)
    );
    if let Some(ref description) = photo.description {
        let _ = write!(html, "<p>{}</p>", escape_html(description));
    }
    render_author(html, photo, user);
    html.push_str("</figcaption>\n</figure>\n");
}

/// Author line under a card. Only the signed-in owner has a known profile.
fn render_author(html: &mut String, photo: &PhotoRecord, user: Option<&SessionUser>) {
    let author = user.filter(|user| user.id == photo.owner_id);
    let name = author.map_or("User", |user| user.name.as_str());

    html.push_str("<div class=\"author\">");
    match author.and_then(|user| user.picture.as_deref()) {
        Some(picture) => {
            let _ = write!(
                html,
                "<img class=\"avatar\" src=\"{}\" alt=\"\">",
                escape_html(picture)
            );
        }
        None => {
            let initial = name.chars().next().map(|c| c.to_uppercase().to_string());
            let _ = write!(
                html,
                "<span class=\"avatar placeholder\">{}</span>",
                escape_html(initial.as_deref().unwrap_or("?"))
            );
        }
    }
    let _ = write!(html, "<span class=\"name\">{}</span></div>", escape_html(name));
}

const UPLOAD_FORM: &str = "<form id=\"upload\" enctype=\"multipart/form-data\">\n\
<input type=\"file\" name=\"file\" accept=\"image/*\" required>\n\
<input type=\"text\" name=\"title\" placeholder=\"Title\" required>\n\
<input type=\"text\" name=\"description\" placeholder=\"Description\">\n\
<button type=\"submit\">Upload</button>\n\
<span id=\"upload-status\" role=\"status\"></span>\n\
</form>\n";

const UPLOAD_SCRIPT: &str = r#"<script>
document.getElementById("upload").addEventListener("submit", async (event) => {
  event.preventDefault();
  const status = document.getElementById("upload-status");
  status.textContent = "Uploading...";
  const response = await fetch("/api/v1/photos", { method: "POST", body: new FormData(event.target) });
  if (response.ok) {
    location.reload();
  } else {
    const body = await response.json().catch(() => ({ error: "Upload failed" }));
    status.textContent = body.error;
  }
});
</script>
"#;

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
