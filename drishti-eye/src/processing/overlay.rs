//! Deterministic detection overlays
//!
//! Every label always gets the same colour: known COCO classes map by index
//! into a fixed palette, anything else by an FNV-1a hash of the label.

use drishti_core::Detection;
use image::{Rgb, RgbImage};

const BORDER: u32 = 2;
const TAB_HEIGHT: u32 = 10;
const TAB_CHAR_WIDTH: u32 = 6;

/// COCO class names, the label set most detectors emit
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
    "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
    "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
    "couch", "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator",
    "book", "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

const PALETTE: [[u8; 3]; 12] = [
    [0, 255, 0],
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
    [44, 153, 168],
    [0, 194, 255],
    [52, 69, 147],
];

fn fnv1a(label: &str) -> u64 {
    label.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// Colour used for a label's box and tab
pub fn label_color(label: &str) -> Rgb<u8> {
    let normalized = label.trim().to_ascii_lowercase();
    let index = match COCO_CLASSES.iter().position(|c| *c == normalized) {
        Some(class_id) => class_id,
        None => (fnv1a(&normalized) % PALETTE.len() as u64) as usize,
    };
    Rgb(PALETTE[index % PALETTE.len()])
}

fn fill_rect(image: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgb<u8>) {
    let x1 = x1.min(image.width().saturating_sub(1));
    let y1 = y1.min(image.height().saturating_sub(1));
    for y in y0..=y1 {
        for x in x0..=x1 {
            image.put_pixel(x, y, color);
        }
    }
}

/// Draw a bordered box and a filled label tab for every detection.
/// Boxes are clipped to the image; invisible ones are skipped.
pub fn draw_detections(image: &mut RgbImage, detections: &[Detection]) {
    let (width, height) = image.dimensions();
    for detection in detections {
        let Some((x0, y0, x1, y1)) = detection.bbox.clamp_to(width, height) else {
            continue;
        };
        let color = label_color(&detection.label);

        // top, bottom, left, right edges
        fill_rect(image, x0, y0, x1, (y0 + BORDER - 1).min(y1), color);
        fill_rect(image, x0, y1.saturating_sub(BORDER - 1).max(y0), x1, y1, color);
        fill_rect(image, x0, y0, (x0 + BORDER - 1).min(x1), y1, color);
        fill_rect(image, x1.saturating_sub(BORDER - 1).max(x0), y0, x1, y1, color);

        // tab sits above the box, or inside it when the box touches the top
        let tab_width = (detection.label.chars().count() as u32 * TAB_CHAR_WIDTH).max(TAB_CHAR_WIDTH);
        let tab_x1 = (x0 + tab_width - 1).min(x1);
        let (tab_y0, tab_y1) = if y0 >= TAB_HEIGHT {
            (y0 - TAB_HEIGHT, y0 - 1)
        } else {
            (y0, (y0 + TAB_HEIGHT - 1).min(y1))
        };
        fill_rect(image, x0, tab_y0, tab_x1, tab_y1, color);
    }
}
