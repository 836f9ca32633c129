mod bit;

pub use bit::{Bit, BitSet};
