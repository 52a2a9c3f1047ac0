use crate::{
    bounds::WorldBounds,
    error::{Error, Result},
    math::{Float, Vector},
    storage::ParticleStore,
};
use std::{
    io::{self, Read, Write},
    marker::PhantomData,
    time::Duration,
};

/// Header written once at the start of a dump.
///
/// Encoded little-endian as the particle count (`u64`), the time step (`f32`), then the bounds
/// of every axis as `max` followed by `min` (`f32` each).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DumpHeader<const D: usize> {
    /// Number of particles of every frame.
    pub particle_count: u64,
    /// Duration of a step.
    pub time_step: f32,
    /// Maximum corner of the world.
    pub max: [f32; D],
    /// Minimum corner of the world.
    pub min: [f32; D],
}

impl<const D: usize> DumpHeader<D> {
    /// Number of bytes of the encoded header.
    pub const ENCODED_LEN: usize = 8 + 4 + 2 * 4 * D;

    /// Creates a new [`DumpHeader`] for a run of `particle_count` particles.
    pub fn new<S: Float>(particle_count: usize, time_step: S, bounds: &WorldBounds<S, D>) -> Self {
        Self {
            particle_count: particle_count as u64,
            time_step: time_step.to_f64() as f32,
            max: bounds.max().map(|c| c.to_f64() as f32),
            min: bounds.min().map(|c| c.to_f64() as f32),
        }
    }

    /// Appends the encoded header to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.particle_count.to_le_bytes());
        self.time_step.write_le(out);
        for axis in 0..D {
            self.max[axis].write_le(out);
            self.min[axis].write_le(out);
        }
    }

    /// Writes the encoded header.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        self.encode(&mut out);
        writer.write_all(&out)
    }

    /// Reads an encoded header.
    ///
    /// A source shorter than [`ENCODED_LEN`](Self::ENCODED_LEN) bytes fails with
    /// [`io::ErrorKind::UnexpectedEof`].
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> io::Result<Self> {
        let mut bytes = vec![0; Self::ENCODED_LEN];
        reader.read_exact(&mut bytes)?;

        let f32_at = |offset: usize| f32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]);
        let mut count = [0; 8];
        count.copy_from_slice(&bytes[..8]);

        Ok(Self {
            particle_count: u64::from_le_bytes(count),
            time_step: f32_at(8),
            max: std::array::from_fn(|axis| f32_at(12 + 8 * axis)),
            min: std::array::from_fn(|axis| f32_at(16 + 8 * axis)),
        })
    }
}

/// Returns the number of bytes of one particle record.
///
/// A record holds the position and velocity with the precision of the store, followed by an
/// `f64` mass if `with_mass` is set.
#[inline]
pub const fn record_len<S: Float, const D: usize>(with_mass: bool) -> usize {
    2 * D * S::BYTES + if with_mass { 8 } else { 0 }
}

/// Appends one record per particle of the store to `out`, in index order.
///
/// Stores without masses are written with a mass of one when `with_mass` is set.
pub fn encode_frame<S: Float, const D: usize>(
    store: &ParticleStore<S, D>,
    with_mass: bool,
    out: &mut Vec<u8>,
) {
    out.reserve(store.len() * record_len::<S, D>(with_mass));
    for i in 0..store.len() {
        for &c in store.positions()[i].iter().chain(&store.velocities()[i]) {
            c.write_le(out);
        }
        if with_mass {
            store.mass(i).to_f64().write_le(out);
        }
    }
}

/// Reads the frames of a dump back, one [`ParticleStore`] per step.
///
/// The precision `S`, the dimension `D` and the presence of masses are not stored in the dump
/// and must match the ones of the run that wrote it. A frame cut short by the end of the source
/// marks the end of the dump, not an error.
///
/// # Example
///
/// ```
/// # use particle_box::prelude::*;
/// use particle_box::persistence::format::encode_frame;
///
/// let bounds = WorldBounds::new([0.0, 0.0], [4.0, 2.0])?;
/// let store = ParticleStore::<f32, 2>::new(vec![[1.0, 1.0]], vec![[0.5, -0.5]], None)?;
///
/// let mut dump = Vec::new();
/// DumpHeader::new(store.len(), 0.04, &bounds).encode(&mut dump);
/// encode_frame(&store, false, &mut dump);
///
/// let mut reader = DumpReader::<_, f32, 2>::new(dump.as_slice(), false)?;
/// assert_eq!(reader.header().max, [4.0, 2.0]);
/// assert_eq!(reader.next_frame()?, Some(store));
/// assert_eq!(reader.next_frame()?, None);
/// # Ok::<(), particle_box::Error>(())
/// ```
#[derive(Debug)]
pub struct DumpReader<R, S, const D: usize> {
    reader: R,
    header: DumpHeader<D>,
    with_mass: bool,
    particle_count: usize,
    frame_len: usize,
    frame: Vec<u8>,
    _precision: PhantomData<S>,
}

impl<R: Read, S: Float, const D: usize> DumpReader<R, S, D> {
    /// Creates a new [`DumpReader`], reading the header from the source.
    pub fn new(mut reader: R, with_mass: bool) -> Result<Self> {
        let header = DumpHeader::read_from(&mut reader)?;
        let particle_count = usize::try_from(header.particle_count)
            .map_err(|_| Error::config("dump particle count does not fit in memory"))?;
        let frame_len = particle_count
            .checked_mul(record_len::<S, D>(with_mass))
            .ok_or_else(|| Error::config("dump frames do not fit in memory"))?;

        Ok(Self {
            reader,
            header,
            with_mass,
            particle_count,
            frame_len,
            frame: Vec::new(),
            _precision: PhantomData,
        })
    }

    /// Returns the header of the dump.
    #[inline]
    pub fn header(&self) -> &DumpHeader<D> {
        &self.header
    }

    /// Duration between two frames when the dump is played back in real time.
    #[inline]
    pub fn frame_interval(&self) -> Duration {
        Duration::try_from_secs_f32(self.header.time_step).unwrap_or_default()
    }

    /// Reads the next frame, or returns `None` once the dump is exhausted.
    ///
    /// The frame buffer only grows with the bytes actually read, whatever the particle count
    /// announced by the header.
    pub fn next_frame(&mut self) -> Result<Option<ParticleStore<S, D>>> {
        if self.frame_len == 0 {
            return Ok(None);
        }

        self.frame.clear();
        let filled = (&mut self.reader)
            .take(self.frame_len as u64)
            .read_to_end(&mut self.frame)?;
        if filled < self.frame_len {
            if filled > 0 {
                tracing::debug!(
                    bytes = filled,
                    expected = self.frame_len,
                    "ignoring partial frame at the end of the dump"
                );
            }
            return Ok(None);
        }

        self.decode().map(Some)
    }

    fn decode(&self) -> Result<ParticleStore<S, D>> {
        let mut positions = Vec::with_capacity(self.particle_count);
        let mut velocities = Vec::with_capacity(self.particle_count);
        let mut masses = self.with_mass.then(|| Vec::with_capacity(self.particle_count));

        for record in self.frame.chunks_exact(record_len::<S, D>(self.with_mass)) {
            let mut scalars = record.chunks_exact(S::BYTES).map(S::read_le);
            let mut next = || scalars.next().flatten().unwrap_or(S::ZERO);
            let position: Vector<S, D> = std::array::from_fn(|_| next());
            let velocity: Vector<S, D> = std::array::from_fn(|_| next());
            positions.push(position);
            velocities.push(velocity);

            if let Some(masses) = masses.as_mut() {
                let mass = f64::read_le(&record[2 * D * S::BYTES..]).unwrap_or(1.0);
                masses.push(S::from_f64(mass));
            }
        }

        ParticleStore::new(positions, velocities, masses)
    }
}

impl<R: Read, S: Float, const D: usize> Iterator for DumpReader<R, S, D> {
    type Item = Result<ParticleStore<S, D>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}
