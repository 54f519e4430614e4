//! `robots.txt` scanning. Only sitemap pointers are read; access rules are not
//! enforced.

/// Extract `Sitemap:` directive values from a robots.txt body, in file order.
///
/// The directive name is matched case-insensitively. Comments after `#` are
/// ignored and empty values are skipped.
pub fn sitemap_directives(content: &str) -> Vec<String> {
    let mut sitemaps = Vec::new();

    for line in content.lines() {
        let line = match line.split_once('#') {
            Some((before, _)) => before,
            None => line,
        }
        .trim();

        if line.is_empty() {
            continue;
        }

        if let Some((directive, value)) = line.split_once(':') {
            if directive.trim().eq_ignore_ascii_case("sitemap") {
                let value = value.trim();
                if !value.is_empty() {
                    sitemaps.push(value.to_string());
                }
            }
        }
    }

    sitemaps
}
