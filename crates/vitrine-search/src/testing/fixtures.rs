//! Common test data.

use std::io::Cursor;

use crate::table::EmbeddingTable;

/// Three bottles on a 2-d plane: red `[1,0]`, blue `[0,1]`, purple `[1,1]`.
pub fn three_item_table() -> EmbeddingTable {
    EmbeddingTable::new(
        vec![
            "s3://casa/bottles/red.png".to_string(),
            "s3://casa/bottles/blue.png".to_string(),
            "s3://casa/bottles/purple.png".to_string(),
        ],
        vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
    )
    .expect("fixture table is well formed")
}

/// [`three_item_table`] as a CSV payload with a header row.
pub fn three_item_csv() -> String {
    "id,e0,e1\n\
     s3://casa/bottles/red.png,1.0,0.0\n\
     s3://casa/bottles/blue.png,0.0,1.0\n\
     s3://casa/bottles/purple.png,1.0,1.0\n"
        .to_string()
}

/// The same table in the dataframe-export layout: a leading unnamed index
/// column, then `Name`, then the components.
pub fn three_item_indexed_csv() -> String {
    ",Name,0,1\n\
     0,s3://casa/bottles/red.png,1.0,0.0\n\
     1,s3://casa/bottles/blue.png,0.0,1.0\n\
     2,s3://casa/bottles/purple.png,1.0,1.0\n"
        .to_string()
}

/// A 2x2 PNG.
pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(2, 2, image::Rgb([30, 60, 200]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("PNG encoding into memory cannot fail");
    out.into_inner()
}
