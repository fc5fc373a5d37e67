pub use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
