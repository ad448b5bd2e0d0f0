#![allow(dead_code)]

use std::{fs, path::Path};

use image::{Rgba, RgbaImage};

pub const SIDE: u32 = 54;

/// An image whose alpha channel depends on the position and `seed`, and is never symmetric.
pub fn glyph(side: u32, seed: u32) -> RgbaImage {
    RgbaImage::from_fn(side, side, |x, y| {
        let alpha = (x * 7 + y * 13 + x * y + seed * 31) % 256;
        Rgba([0, 0, 0, alpha as u8])
    })
}

/// Writes a glyph PNG, creating its parent directories.
pub fn write_glyph(path: &Path, side: u32, seed: u32) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    glyph(side, seed).save(path).unwrap();
}

/// Writes a font dump with one font per entry, each holding `per_label` glyphs of every label
/// in the lowercase directory.
pub fn font_dump(root: &Path, labels: &str, per_label: usize) {
    for font in 0..per_label {
        for (i, label) in labels.chars().enumerate() {
            let path = root
                .join(format!("font{font}"))
                .join("lowercase")
                .join(format!("{label}.png"));
            write_glyph(&path, SIDE, (font * 10 + i) as u32);
        }
    }
}
