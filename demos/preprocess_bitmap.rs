//! Draw a synthetic "1" on a white 200x200 canvas, preprocess it and print the 28x28 result.

use digit_mlp::preprocess::{self, Bitmap, SIDE};

fn main() -> digit_mlp::Result<()> {
    let (w, h) = (200, 200);
    let mut rgba = vec![255_u8; w * h * 4];
    // dark stroke, slightly slanted and off-centre
    for y in 30..170 {
        let x0 = 120 - y / 10;
        for x in x0..x0 + 14 {
            let i = (y * w + x) * 4;
            rgba[i..i + 3].fill(20);
        }
    }
    let bitmap = Bitmap::new(w, h, rgba)?;

    let gray = preprocess::invert_if_light(preprocess::grayscale(&bitmap), w, h);
    if let Some(bbox) = preprocess::bounding_box(&gray, w, h) {
        let (fw, fh) = preprocess::fit_size(bbox.width, bbox.height);
        println!("ink bounding box: {bbox:?}, resized to {fw}x{fh}");
    }

    let row = preprocess::preprocess(&bitmap);
    for line in row.chunks(SIDE) {
        let text: String = line
            .iter()
            .map(|&v| match v {
                v if v > 0.75 => '#',
                v if v > 0.25 => '+',
                v if v > 0.0 => '.',
                _ => ' ',
            })
            .collect();
        println!("|{text}|");
    }
    if let Some((cx, cy)) = preprocess::center_of_mass(&row) {
        println!("centre of mass: ({cx:.2}, {cy:.2})");
    }
    Ok(())
}
