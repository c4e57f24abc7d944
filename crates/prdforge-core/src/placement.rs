use crate::{FlowNode, Position};

/// Horizontal clearance a new page keeps from existing pages.
pub const MIN_DX: f64 = 250.0;
/// Vertical clearance a new page keeps from existing pages.
pub const MIN_DY: f64 = 150.0;

const ORIGIN: Position = Position { x: 100.0, y: 100.0 };
const COLUMNS: usize = 5;

/// Whether `candidate` sits outside the 250x150 box around every existing page.
pub fn is_free(candidate: Position, nodes: &[FlowNode]) -> bool {
    !nodes.iter().any(|n| {
        (n.position.x - candidate.x).abs() < MIN_DX && (n.position.y - candidate.y).abs() < MIN_DY
    })
}

/// Grid slot `index`, filled row by row.
pub fn grid_position(index: usize) -> Position {
    let col = index % COLUMNS;
    let row = index / COLUMNS;
    Position {
        x: ORIGIN.x + col as f64 * MIN_DX,
        y: ORIGIN.y + row as f64 * MIN_DY,
    }
}

/// Default position for a manually added page: the first grid slot that does
/// not overlap an existing page.
pub fn next_free_position(nodes: &[FlowNode]) -> Position {
    // Each node blocks a bounded number of slots, so this terminates.
    let mut slot = 0;
    loop {
        let candidate = grid_position(slot);
        if is_free(candidate, nodes) {
            return candidate;
        }
        slot += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PageData;

    fn at(x: f64, y: f64) -> FlowNode {
        FlowNode::new(format!("{x}-{y}"), Position::new(x, y), PageData::default())
    }

    #[test]
    fn empty_canvas_uses_origin() {
        assert_eq!(next_free_position(&[]), Position::new(100.0, 100.0));
    }

    #[test]
    fn skips_occupied_slots() {
        let nodes = vec![at(100.0, 100.0), at(350.0, 100.0)];
        assert_eq!(next_free_position(&nodes), Position::new(600.0, 100.0));
    }

    #[test]
    fn wraps_to_next_row() {
        let nodes: Vec<FlowNode> = (0..5).map(|i| {
            let p = grid_position(i);
            at(p.x, p.y)
        }).collect();
        assert_eq!(next_free_position(&nodes), Position::new(100.0, 250.0));
    }

    #[test]
    fn never_overlaps_scattered_pages() {
        let mut nodes = vec![
            at(120.0, 90.0),
            at(-40.0, 10.0),
            at(610.0, 240.0),
            at(333.3, 171.0),
            at(1000.0, 100.0),
        ];
        for _ in 0..40 {
            let p = next_free_position(&nodes);
            for n in &nodes {
                let overlaps = (n.position.x - p.x).abs() < MIN_DX && (n.position.y - p.y).abs() < MIN_DY;
                assert!(!overlaps, "{p:?} overlaps {:?}", n.position);
            }
            nodes.push(at(p.x, p.y));
        }
    }
}
