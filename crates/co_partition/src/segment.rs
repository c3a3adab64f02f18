use co_bitmap::Bitmap;
use co_index::{AttrKey, AttributeStore};

/// Bitmap algebra over named `(property, value)` leaves.
///
/// The query compiler lowers segment definitions into these trees; evaluation
/// walks them against the attribute index and leaves the result in a fresh
/// bitmap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SegmentExpr {
    /// The customers holding this value.
    Bits(AttrKey),

    And(Box<SegmentExpr>, Box<SegmentExpr>),
    Or(Box<SegmentExpr>, Box<SegmentExpr>),
    AndNot(Box<SegmentExpr>, Box<SegmentExpr>),
    Not(Box<SegmentExpr>),
}

impl SegmentExpr {
    pub fn bits(key: AttrKey) -> Self {
        Self::Bits(key)
    }

    pub fn and(self, other: Self) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Self) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    pub fn and_not(self, other: Self) -> Self {
        Self::AndNot(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Evaluate against the index. `universe_bits` bounds NOT: complements
    /// are taken over the partition's linear-id space, then masked back down.
    pub fn evaluate(&self, attrs: &mut AttributeStore, universe_bits: usize) -> Bitmap {
        match self {
            Self::Bits(key) => {
                let mut out = Bitmap::with_bit_capacity(universe_bits);
                out.op_or(attrs.get_bits(*key));
                out
            }
            Self::And(lhs, rhs) => {
                let mut out = lhs.evaluate(attrs, universe_bits);
                let rhs = rhs.evaluate(attrs, universe_bits);
                out.op_and(&rhs);
                out
            }
            Self::Or(lhs, rhs) => {
                let mut out = lhs.evaluate(attrs, universe_bits);
                let rhs = rhs.evaluate(attrs, universe_bits);
                out.op_or(&rhs);
                out
            }
            Self::AndNot(lhs, rhs) => {
                let mut out = lhs.evaluate(attrs, universe_bits);
                let rhs = rhs.evaluate(attrs, universe_bits);
                out.op_and_not(&rhs);
                out
            }
            Self::Not(expr) => {
                let mut out = expr.evaluate(attrs, universe_bits);
                out.op_not();
                // Mask the flipped tail beyond the universe.
                for bit in universe_bits..out.num_words() * 64 {
                    out.clear(bit);
                }
                out
            }
        }
    }
}
