// src/grid.rs

/// Structured 2D node-centred finite-difference grid.
///
/// `nx`, `ny` count nodes including the boundary, so the spacing is `lx / (nx - 1)`.
/// Field arrays come in two layouts: *full* (`nx * ny`, row-major, boundary included) and
/// *interior* (`(nx - 2) * (ny - 2)`, boundary stripped).
#[derive(Debug, Clone)]
pub struct Grid2D {
    pub nx: usize,
    pub ny: usize,
    pub lx: f64,
    pub ly: f64,
    pub hx: f64,
    pub hy: f64,
    pub ihx2: f64,
    pub ihy2: f64,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl Grid2D {
    /// Create a grid with `nx` × `ny` nodes covering `[0, lx] × [0, ly]`.
    pub fn new(nx: usize, ny: usize, lx: f64, ly: f64) -> Self {
        debug_assert!(nx >= 3 && ny >= 3, "grid needs at least one interior node");
        let hx = lx / (nx - 1) as f64;
        let hy = ly / (ny - 1) as f64;
        let x = (0..nx).map(|i| i as f64 * hx).collect();
        let y = (0..ny).map(|j| j as f64 * hy).collect();
        Self {
            nx,
            ny,
            lx,
            ly,
            hx,
            hy,
            ihx2: 1.0 / (hx * hx),
            ihy2: 1.0 / (hy * hy),
            x,
            y,
        }
    }

    /// Total number of nodes.
    pub fn size(&self) -> usize {
        self.nx * self.ny
    }

    /// Interior nodes per row.
    #[inline]
    pub fn in_x(&self) -> usize {
        self.nx - 2
    }

    /// Interior rows.
    #[inline]
    pub fn in_y(&self) -> usize {
        self.ny - 2
    }

    pub fn num_interior(&self) -> usize {
        self.in_x() * self.in_y()
    }

    /// Convert (i, j) indices to a flat index into a full array.
    #[inline]
    pub fn idx(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < self.nx && j < self.ny);
        j * self.nx + i
    }

    /// Flat index into an interior array; valid for `1 <= i <= nx-2`, `1 <= j <= ny-2`.
    #[inline]
    pub fn idx_interior(&self, i: usize, j: usize) -> usize {
        debug_assert!(i >= 1 && i <= self.nx - 2 && j >= 1 && j <= self.ny - 2);
        (j - 1) * self.in_x() + (i - 1)
    }

    /// Copy the interior of `full` into `interior`.
    pub fn extract_interior(&self, full: &[f64], interior: &mut [f64]) {
        debug_assert_eq!(full.len(), self.size());
        debug_assert_eq!(interior.len(), self.num_interior());
        let in_x = self.in_x();
        for (jj, row) in interior.chunks_exact_mut(in_x).enumerate() {
            let start = self.idx(1, jj + 1);
            row.copy_from_slice(&full[start..start + in_x]);
        }
    }

    /// Copy `interior` into the interior of `full`; boundary entries are left alone.
    pub fn inject_interior(&self, interior: &[f64], full: &mut [f64]) {
        debug_assert_eq!(full.len(), self.size());
        debug_assert_eq!(interior.len(), self.num_interior());
        let in_x = self.in_x();
        for (jj, row) in interior.chunks_exact(in_x).enumerate() {
            let start = self.idx(1, jj + 1);
            full[start..start + in_x].copy_from_slice(row);
        }
    }
}
