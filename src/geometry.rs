use serde::{Deserialize, Serialize};




/**
 * Identifier for a Cartesian axis
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}




/**
 * An axis-aligned rectangle in a discrete index space. Both bounds are
 * inclusive: the box `x0..=x1, y0..=y1` contains `(x1, y1)`. The index type
 * is signed 64-bit integer. The bounds are private so every box goes
 * through the constructor's non-negative-volume check.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Box2D {
    x0: i64,
    x1: i64,
    y0: i64,
    y1: i64,
}




// ============================================================================
impl Box2D {


    pub fn new(x0: i64, x1: i64, y0: i64, y1: i64) -> Self {

        assert!(
            x0 <= x1 && y0 <= y1,
            "box ({}..{} {}..{}) has negative volume", x0, x1, y0, y1);

        Self { x0, x1, y0, y1 }
    }


    pub fn x0(&self) -> i64 {
        self.x0
    }


    pub fn x1(&self) -> i64 {
        self.x1
    }


    pub fn y0(&self) -> i64 {
        self.y0
    }


    pub fn y1(&self) -> i64 {
        self.y1
    }


    /**
     * Return the number of indexes on each axis.
     */
    pub fn dim(&self) -> (usize, usize) {
        ((self.x1 - self.x0 + 1) as usize,
         (self.y1 - self.y0 + 1) as usize)
    }


    pub fn nx(&self) -> i64 {
        self.x1 - self.x0 + 1
    }


    pub fn ny(&self) -> i64 {
        self.y1 - self.y0 + 1
    }


    /**
     * Return the number of cells in this box.
     */
    pub fn num_cells(&self) -> usize {
        let (l, m) = self.dim();
        l * m
    }


    /**
     * Translate this box by the given displacement.
     */
    pub fn shift(&self, dx: i64, dy: i64) -> Self {
        Self {
            x0: self.x0 + dx,
            x1: self.x1 + dx,
            y0: self.y0 + dy,
            y1: self.y1 + dy,
        }
    }


    /**
     * Expand this box by the given number of cells on every side.
     */
    pub fn enlarge(&self, delta: i64) -> Self {
        Self::new(
            self.x0 - delta, self.x1 + delta,
            self.y0 - delta, self.y1 + delta)
    }


    /**
     * Expand this box on both sides of one axis only.
     */
    pub fn enlarge_on(&self, axis: Axis, delta: i64) -> Self {
        match axis {
            Axis::X => Self::new(self.x0 - delta, self.x1 + delta, self.y0, self.y1),
            Axis::Y => Self::new(self.x0, self.x1, self.y0 - delta, self.y1 + delta),
        }
    }


    /**
     * Determine whether this box contains the given index.
     */
    pub fn contains(&self, index: (i64, i64)) -> bool {
        self.x0 <= index.0 && index.0 <= self.x1 &&
        self.y0 <= index.1 && index.1 <= self.y1
    }


    /**
     * Determine whether another box is a subset of this one.
     */
    pub fn contains_box(&self, other: &Self) -> bool {
        other.x0 >= self.x0 && other.x1 <= self.x1 &&
        other.y0 >= self.y0 && other.y1 <= self.y1
    }


    /**
     * Return the intersection of two boxes, or `None` if they are disjoint.
     * An empty intersection is not an error anywhere in this crate; callers
     * drop the `None` case and move on.
     */
    pub fn intersection(a: &Self, b: &Self) -> Option<Self> {
        let x0 = a.x0.max(b.x0);
        let x1 = a.x1.min(b.x1);
        let y0 = a.y0.max(b.y0);
        let y1 = a.y1.min(b.y1);

        if x0 <= x1 && y0 <= y1 {
            Some(Self { x0, x1, y0, y1 })
        } else {
            None
        }
    }


    /**
     * Subtract another box from this one, returning the remainder as a list
     * of up to four disjoint rectangles. Returns `[self]` if the boxes do
     * not intersect, and an empty list if `other` covers this box entirely.
     */
    pub fn minus(&self, other: &Self) -> Vec<Self> {
        let common = match Self::intersection(self, other) {
            Some(common) => common,
            None => return vec![*self],
        };
        let mut parts = Vec::new();

        if self.y0 < common.y0 {
            parts.push(Self::new(self.x0, self.x1, self.y0, common.y0 - 1));
        }
        if common.y1 < self.y1 {
            parts.push(Self::new(self.x0, self.x1, common.y1 + 1, self.y1));
        }
        if self.x0 < common.x0 {
            parts.push(Self::new(self.x0, common.x0 - 1, common.y0, common.y1));
        }
        if common.x1 < self.x1 {
            parts.push(Self::new(common.x1 + 1, self.x1, common.y0, common.y1));
        }
        parts
    }


    /**
     * Return the linear offset for the given index, in a row-major memory
     * buffer aligned with the lower corner of this box.
     */
    pub fn row_major_offset(&self, index: (i64, i64)) -> usize {
        let i = (index.0 - self.x0) as usize;
        let j = (index.1 - self.y0) as usize;
        let m = self.ny() as usize;
        i * m + j
    }


    /**
     * Return an iterator which traverses the box in row-major order (the
     * second index increases fastest).
     */
    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        (self.x0..=self.x1).flat_map(move |x| (self.y0..=self.y1).map(move |y| (x, y)))
    }
}




/**
 * Less imposing factory function to construct a Box2D object.
 */
pub fn box2d(x0: i64, x1: i64, y0: i64, y1: i64) -> Box2D {
    Box2D::new(x0, x1, y0, y1)
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{box2d, Box2D};

    #[test]
    fn box_dimensions_are_inclusive() {
        let b = box2d(0, 9, 0, 4);
        assert_eq!(b.dim(), (10, 5));
        assert_eq!(b.num_cells(), 50);
        assert!(b.contains((9, 4)));
        assert!(!b.contains((10, 4)));
    }

    #[test]
    fn intersection_works() {
        let a = box2d(0, 9, 0, 9);
        let b = box2d(5, 14, 5, 14);
        assert_eq!(Box2D::intersection(&a, &b), Some(box2d(5, 9, 5, 9)));
        assert_eq!(Box2D::intersection(&a, &box2d(10, 12, 0, 9)), None);
    }

    #[test]
    fn intersection_of_touching_boxes_is_one_cell_wide() {
        let a = box2d(0, 5, 0, 5);
        let b = box2d(5, 9, 0, 5);
        assert_eq!(Box2D::intersection(&a, &b), Some(box2d(5, 5, 0, 5)));
    }

    #[test]
    fn subtraction_remainder_is_disjoint_and_covers() {
        let a = box2d(0, 9, 0, 9);
        let b = box2d(3, 6, 3, 6);
        let parts = a.minus(&b);

        let covered: usize = parts.iter().map(|p| p.num_cells()).sum();
        assert_eq!(covered + Box2D::intersection(&a, &b).unwrap().num_cells(), a.num_cells());

        for (i, p) in parts.iter().enumerate() {
            assert_eq!(Box2D::intersection(p, &b), None);
            for q in &parts[i + 1..] {
                assert_eq!(Box2D::intersection(p, q), None);
            }
        }
    }

    #[test]
    fn subtraction_of_disjoint_box_is_identity() {
        let a = box2d(0, 4, 0, 4);
        assert_eq!(a.minus(&box2d(5, 9, 0, 4)), vec![a]);
        assert!(a.minus(&box2d(0, 4, 0, 4)).is_empty());
    }

    #[test]
    fn row_major_iteration_matches_offsets() {
        let b = box2d(2, 4, 3, 7);
        for (n, index) in b.iter().enumerate() {
            assert_eq!(b.row_major_offset(index), n);
        }
    }

    #[test]
    #[should_panic]
    fn negative_volume_box_panics() {
        box2d(4, 2, 0, 4);
    }
}
