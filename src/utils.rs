/// Text processing utilities shared by the importer.
pub mod text {
    /// Clip a string to at most `max` characters, on a char boundary.
    pub fn clip(value: &str, max: usize) -> String {
        match value.char_indices().nth(max) {
            Some((idx, _)) => value[..idx].to_string(),
            None => value.to_string(),
        }
    }

    /// Truncate HTML to at most `max_words` words of visible text.
    ///
    /// The cut never lands inside a tag, and tags still open at the cut are
    /// closed so the fragment stays well-formed. Entities count as part of
    /// the word they appear in.
    pub fn truncate_html_words(html: &str, max_words: usize) -> String {
        if max_words == 0 {
            return String::new();
        }

        let mut words = 0usize;
        let mut in_word = false;
        let mut open_tags: Vec<String> = Vec::new();
        let mut out = String::with_capacity(html.len().min(4096));
        let mut chars = html.char_indices();

        while let Some((idx, ch)) = chars.next() {
            if ch == '<' {
                // Consume the whole tag.
                let tag_start = idx;
                let mut tag_end = None;
                for (jdx, jch) in chars.by_ref() {
                    if jch == '>' {
                        tag_end = Some(jdx);
                        break;
                    }
                }
                let tag = match tag_end {
                    Some(end) => &html[tag_start..=end],
                    // Unterminated tag: drop the tail.
                    None => break,
                };
                out.push_str(tag);
                track_tag(&mut open_tags, tag);
                in_word = false;
                continue;
            }

            if ch.is_whitespace() {
                if in_word {
                    in_word = false;
                    if words >= max_words {
                        break;
                    }
                }
                out.push(ch);
            } else {
                if !in_word {
                    in_word = true;
                    words += 1;
                    if words > max_words {
                        break;
                    }
                }
                out.push(ch);
            }
        }

        let truncated = out.trim_end().len() < html.trim_end().len();
        let mut result = out.trim_end().to_string();
        if truncated && !result.is_empty() {
            result.push_str(" ...");
        }
        for tag in open_tags.iter().rev() {
            result.push_str("</");
            result.push_str(tag);
            result.push('>');
        }
        result
    }

    const VOID_ELEMENTS: &[&str] = &[
        "area", "base", "br", "col", "embed", "hr", "img", "input", "link",
        "meta", "param", "source", "track", "wbr",
    ];

    fn track_tag(open_tags: &mut Vec<String>, tag: &str) {
        let inner = tag.trim_start_matches('<').trim_end_matches('>').trim();
        if inner.starts_with('!') || inner.starts_with('?') || inner.ends_with('/') {
            return;
        }
        if let Some(name) = inner.strip_prefix('/') {
            let name = tag_name(name);
            if let Some(pos) = open_tags.iter().rposition(|t| *t == name) {
                open_tags.remove(pos);
            }
            return;
        }
        let name = tag_name(inner);
        if !name.is_empty() && !VOID_ELEMENTS.contains(&name.as_str()) {
            open_tags.push(name);
        }
    }

    fn tag_name(inner: &str) -> String {
        inner
            .split(|c: char| c.is_whitespace() || c == '/' || c == '>')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase()
    }
}
