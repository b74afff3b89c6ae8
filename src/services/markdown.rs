use std::ops::Range;

use pulldown_cmark::{Event, Options, Parser, Tag};

/// Remove bold, italic and inline-code markers from model output, leaving
/// every other character (headings, list bullets, line breaks) untouched.
pub fn strip_emphasis(input: &str) -> String {
    let mut edits: Vec<(Range<usize>, String)> = Vec::new();

    for (event, range) in Parser::new_ext(input, Options::empty()).into_offset_iter() {
        match event {
            Event::Start(Tag::Strong) => push_delimiters(&mut edits, input, range, 2),
            Event::Start(Tag::Emphasis) => push_delimiters(&mut edits, input, range, 1),
            Event::Code(code) => edits.push((range, code.to_string())),
            _ => {}
        }
    }

    edits.sort_by_key(|(range, _)| range.start);

    let mut output = String::with_capacity(input.len());
    let mut cursor = 0;
    for (range, replacement) in edits {
        if range.start < cursor {
            continue;
        }
        output.push_str(&input[cursor..range.start]);
        output.push_str(&replacement);
        cursor = range.end;
    }
    output.push_str(&input[cursor..]);
    output
}

fn push_delimiters(
    edits: &mut Vec<(Range<usize>, String)>,
    input: &str,
    range: Range<usize>,
    width: usize,
) {
    if range.len() < width * 2 {
        return;
    }
    let open = range.start..range.start + width;
    let close = range.end - width..range.end;
    let bytes = input.as_bytes();
    let is_delimiter = |r: &Range<usize>| bytes[r.clone()].iter().all(|b| *b == b'*' || *b == b'_');
    if is_delimiter(&open) && is_delimiter(&close) {
        edits.push((open, String::new()));
        edits.push((close, String::new()));
    }
}
