//! Template matching over RGB screen captures.
//!
//! A full-scan normalized mean-absolute-difference matcher: no pyramids, no
//! FFT. Screens are a few megapixels and templates are small UI chips, so a
//! direct scan with early abandoning is fast enough.

use image::RgbImage;

/// A template hit in screen coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatch {
    /// Center of the matched region (x)
    pub center_x: u32,
    /// Center of the matched region (y)
    pub center_y: u32,
    /// Similarity score in [0, 1], 1 being a pixel-perfect match
    pub score: f64,
}

/// Find the best placement of `template` inside `screen`.
///
/// The score is `1 - mean(|a - b|) / 255` over all channels. Returns `None`
/// when the template does not fit or the best score is below `min_score`.
pub fn locate(screen: &RgbImage, template: &RgbImage, min_score: f64) -> Option<TemplateMatch> {
    let (sw, sh) = screen.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > sw || th > sh {
        return None;
    }

    let pixel_count = (tw as u64) * (th as u64) * 3;
    let max_total = (pixel_count as f64) * 255.0;
    // Any placement whose accumulated difference crosses this can no longer
    // beat min_score, so the inner loop abandons it.
    let abandon_at = ((1.0 - min_score) * max_total).ceil() as u64;

    let mut best: Option<TemplateMatch> = None;
    let mut best_total = u64::MAX;

    for oy in 0..=(sh - th) {
        for ox in 0..=(sw - tw) {
            let mut total: u64 = 0;
            'placement: for ty in 0..th {
                for tx in 0..tw {
                    let s = screen.get_pixel(ox + tx, oy + ty);
                    let t = template.get_pixel(tx, ty);
                    for c in 0..3 {
                        total += s.0[c].abs_diff(t.0[c]) as u64;
                    }
                }
                if total > abandon_at && total >= best_total {
                    break 'placement;
                }
            }

            if total < best_total {
                best_total = total;
                let score = 1.0 - (total as f64) / max_total;
                best = Some(TemplateMatch {
                    center_x: ox + tw / 2,
                    center_y: oy + th / 2,
                    score,
                });
            }
        }
    }

    best.filter(|m| m.score >= min_score)
}
