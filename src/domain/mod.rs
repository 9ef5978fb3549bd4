// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain data types shared by every other layer.
//
// Rules for this layer:
//   - NO burn framework types allowed here
//   - NO file I/O
//   - Only structs and constants describing what a volume IS;
//     how volumes are produced, stored, and consumed lives in
//     the data layer.

// A 3D voxel array with its spatial affine
pub mod volume;
