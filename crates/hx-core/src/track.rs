//! The immutable per-track record read from the input table.

/// Reconstruction-quality / truth flag bits of [`TrackRecord::flags`].
///
/// Bits 0-4 carry the PID hypothesis mask assigned by the filtering task and
/// are not consumed here; bits ≥ 12 carry the tracking PID index.
pub mod flag_bits {
    /// Track has a matched time-of-flight hit.
    pub const HAS_TOF: u32 = 1 << 5;
    /// MC only: the generated particle was reconstructed.
    pub const IS_RECONSTRUCTED: u32 = 1 << 6;
    /// MC only: physical primary.
    pub const IS_PRIMARY: u32 = 1 << 9;
    /// MC only: secondary from material interactions.
    pub const IS_SECONDARY_FROM_MATERIAL: u32 = 1 << 10;
    /// MC only: secondary from weak decays.
    pub const IS_SECONDARY_FROM_WEAK_DECAY: u32 = 1 << 11;
}

/// Monte-Carlo truth attached to a [`TrackRecord`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct McTruth {
    /// Generated transverse momentum (GeV/c).
    pub gen_pt: f64,
    /// Generated pseudorapidity.
    pub gen_eta: f64,
    /// Signed PDG code of the generated particle.
    pub pdg_code: i32,
}

/// One reconstructed particle candidate.
///
/// Immutable once read; derived quantities live in a separate structure and
/// never mutate the source fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackRecord {
    /// Signed transverse rigidity (GeV/c); the sign encodes matter/antimatter.
    pub pt_signed: f64,
    /// Pseudorapidity.
    pub eta: f64,
    /// Rigidity at the TPC inner wall (GeV/c), the energy-loss reference.
    pub tpc_inner_param: f64,
    /// Measured TPC energy-loss signal (arbitrary units).
    pub tpc_signal: f64,
    /// Time-of-flight velocity β.
    pub beta: f64,
    /// Transverse impact parameter (cm).
    pub dca_xy: f64,
    /// Longitudinal impact parameter (cm).
    pub dca_z: f64,
    /// Number of TPC clusters.
    pub tpc_clusters: u16,
    /// Inner-tracker cluster-presence bitmap (7 layers).
    pub its_cluster_map: u32,
    /// Reconstruction-quality / truth bitfield, see [`flag_bits`].
    pub flags: u32,
    /// Generated-particle truth, present only in simulation.
    pub mc: Option<McTruth>,
}

impl TrackRecord {
    /// Whether the candidate has a matched TOF hit.
    pub fn has_tof(&self) -> bool {
        self.flags & flag_bits::HAS_TOF != 0
    }

    /// MC: whether the generated particle was reconstructed.
    pub fn is_reconstructed(&self) -> bool {
        self.flags & flag_bits::IS_RECONSTRUCTED != 0
    }

    /// MC: physical primary.
    pub fn is_primary(&self) -> bool {
        self.flags & flag_bits::IS_PRIMARY != 0
    }

    /// MC: secondary from material.
    pub fn is_secondary_from_material(&self) -> bool {
        self.flags & flag_bits::IS_SECONDARY_FROM_MATERIAL != 0
    }

    /// MC: secondary from weak decay.
    pub fn is_secondary_from_weak_decay(&self) -> bool {
        self.flags & flag_bits::IS_SECONDARY_FROM_WEAK_DECAY != 0
    }

    /// PID hypothesis used during tracking (upper flag bits).
    pub fn pid_for_tracking(&self) -> u32 {
        self.flags >> 12
    }
}
