//! Rule synthesis from a matched element
//!
//! Walks from the element up to the root element, recording each level's
//! tag, fingerprint, and position among structurally identical siblings.

use scraper::ElementRef;

use crate::stack::{ExtractTarget, Segment, Stack};

/// Build a stack for `element`.
pub fn build_stack(element: ElementRef<'_>, target: ExtractTarget, source_url: &str) -> Stack {
    Stack::new(build_path(element), target, source_url)
}

/// Root-to-element segments. The document node is never part of the path.
pub fn build_path(element: ElementRef<'_>) -> Vec<Segment> {
    let mut content = Vec::new();
    let mut current = element;

    loop {
        let mut segment = Segment::new(current, None);
        match parent_element(current) {
            Some(parent) => {
                segment.index = Some(sibling_index(&segment, parent, current));
                content.push(segment);
                current = parent;
            }
            None => {
                content.push(segment);
                break;
            }
        }
    }

    content.reverse();
    content
}

pub(crate) fn parent_element(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element.parent().and_then(ElementRef::wrap)
}

/// Position of `element` among the children of `parent` that match its
/// own tag and fingerprint.
fn sibling_index(segment: &Segment, parent: ElementRef<'_>, element: ElementRef<'_>) -> usize {
    segment
        .query(1.0)
        .children(parent)
        .iter()
        .position(|sibling| sibling.id() == element.id())
        .unwrap_or(0)
}
