use std::{fs::File, io::BufReader};

use image::{DynamicImage, GenericImageView, ImageReader};
use rand::Rng;

use crate::{FewShotErr, Result, catalog::Sample};

/// The side of the glyph images in the reference font dumps.
pub const DEFAULT_IMAGE_SIZE: u32 = 54;

/// A clockwise rotation by a multiple of 90 degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Angle {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}
use Angle::*;

impl Angle {
    pub const ALL: [Angle; 4] = [Deg0, Deg90, Deg180, Deg270];

    /// Creates an `Angle` from an amount of quarter turns.
    ///
    /// # Panics
    /// If `turns` is not in `0..4`.
    pub fn from_quarter_turns(turns: u8) -> Self {
        match turns {
            0 => Deg0,
            1 => Deg90,
            2 => Deg180,
            3 => Deg270,
            _ => panic!("bad angle: {turns} quarter turns"),
        }
    }

    pub fn quarter_turns(self) -> u8 {
        self as u8
    }

    /// Draws one of the four angles uniformly.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::from_quarter_turns(rng.random_range(0..4))
    }

    /// Maps a raster position of the rotated image to the source pixel it shows.
    ///
    /// # Arguments
    /// * `x`, `y` - The position in the rotated image.
    /// * `side` - The side of the square image.
    pub fn source(self, x: u32, y: u32, side: u32) -> (u32, u32) {
        let last = side - 1;

        match self {
            Deg0 => (x, y),
            Deg90 => (y, last - x),
            Deg180 => (last - x, last - y),
            Deg270 => (last - y, x),
        }
    }
}

/// Turns glyph images into feature vectors.
#[derive(Clone, Copy, Debug)]
pub struct Encoder {
    image_size: u32,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_SIZE)
    }
}

impl Encoder {
    /// Creates a new `Encoder` for square images of side `image_size`.
    pub fn new(image_size: u32) -> Self {
        Self { image_size }
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// The length of every encoded vector.
    pub fn len(&self) -> usize {
        (self.image_size * self.image_size) as usize
    }

    /// Loads a sample's image and encodes it rotated by `angle`.
    ///
    /// # Returns
    /// The alpha channel of every pixel scaled to `[0, 1]`, in row-major order, or an error if
    /// the image couldn't be read or decoded, or doesn't have the required size.
    pub fn encode(&self, sample: &Sample, angle: Angle) -> Result<Vec<f32>> {
        let path = &sample.path;
        let file = File::open(path).map_err(|e| FewShotErr::io(path, e))?;

        let img = ImageReader::new(BufReader::new(file))
            .with_guessed_format()
            .map_err(|e| FewShotErr::io(path, e))?
            .decode()
            .map_err(|source| FewShotErr::Decode {
                path: path.clone(),
                source,
            })?;

        let side = self.image_size;
        if img.dimensions() != (side, side) {
            return Err(FewShotErr::Shape {
                path: path.clone(),
                expected: (side, side),
                got: img.dimensions(),
            });
        }

        Ok(self.encode_image(&img, angle))
    }

    /// Encodes an already decoded image of the required size.
    ///
    /// # Panics
    /// If the image is smaller than the required size.
    pub fn encode_image(&self, img: &DynamicImage, angle: Angle) -> Vec<f32> {
        let side = self.image_size;
        let alpha = img.to_rgba16();
        let max = u16::MAX as f32;

        let mut out = Vec::with_capacity(self.len());
        for y in 0..side {
            for x in 0..side {
                let (sx, sy) = angle.source(x, y, side);
                out.push(alpha.get_pixel(sx, sy)[3] as f32 / max);
            }
        }

        out
    }
}
