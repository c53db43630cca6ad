//! FFmpeg filter graph for alpha-channel keying.
//!
//! Everything here is a pure function of [`ConvertOptions`]: the same options
//! always yield byte-identical graphs.

use alphavid_models::{ConvertOptions, KeyColor, WatermarkRegion};

/// Near-black residue removed by the secondary key pass.
pub const RESIDUE_KEY_COLOR: KeyColor = KeyColor { r: 0x0a, g: 0x0a, b: 0x0a };

/// Extra similarity granted to the secondary pass.
pub const RESIDUE_SIMILARITY_BOOST: f64 = 0.05;

/// Upper bound on the secondary pass similarity.
pub const RESIDUE_SIMILARITY_MAX: f64 = 0.95;

/// Opacity of the edge map in the multiply blend.
pub const EDGE_BLEND_OPACITY: f64 = 0.3;

/// Final smoothing blur.
pub const FINAL_BLUR: &str = "gblur=sigma=0.8:steps=1";

/// Inpaint band thickness for watermark removal.
pub const DELOGO_BAND: u32 = 8;

/// Single-stage key removal.
pub fn colorkey(color: KeyColor, similarity: f64, blend: f64) -> String {
    format!(
        "colorkey=color={}:similarity={:.2}:blend={:.2}",
        color.to_engine_hex(),
        similarity,
        blend
    )
}

/// Inpaint the ROI, then force it fully transparent.
///
/// Returned with a trailing comma so it can be prefixed onto any chain.
pub fn watermark_prefix(region: &WatermarkRegion) -> String {
    let rect = format!(
        "x=iw*{:.4}:y=ih*{:.4}:w=iw*{:.4}:h=ih*{:.4}",
        region.x, region.y, region.w, region.h
    );
    format!(
        "delogo={rect}:t={DELOGO_BAND}:show=0,format=rgba,drawbox={rect}:color=black@0:t=fill,"
    )
}

/// One unit erosion, then one dilation sized by `iterations`.
fn morphology(iterations: u8) -> Option<(String, String)> {
    if iterations == 0 {
        return None;
    }
    Some((
        "erosion=coordinates=1".to_string(),
        format!("dilation=coordinates={iterations}"),
    ))
}

/// Multi-stage edge-aware keying graph.
pub fn enhanced_key_graph(opts: &ConvertOptions) -> String {
    let similarity = opts.similarity();
    let blend = opts.blend();
    let residue_similarity = (similarity + RESIDUE_SIMILARITY_BOOST).min(RESIDUE_SIMILARITY_MAX);
    let residue_blend = (blend * 0.5).max(0.01);

    let mut graph = String::from("split=2[main][edge];");

    graph.push_str(&format!(
        "[edge]edgedetect=mode=canny:low={:.2}:high={:.2}[edges];",
        opts.edge_threshold_low, opts.edge_threshold_high
    ));

    graph.push_str(&format!(
        "[main]{}[main1];",
        colorkey(opts.color, similarity, blend)
    ));
    graph.push_str(&format!(
        "[main1]{}[main2];",
        colorkey(RESIDUE_KEY_COLOR, residue_similarity, residue_blend)
    ));

    let keyed = match morphology(opts.morphology_iterations) {
        Some((erosion, dilation)) => {
            graph.push_str(&format!("[main2]{erosion}[main3];"));
            graph.push_str(&format!("[main3]{dilation}[main4];"));
            "main4"
        }
        None => "main2",
    };

    graph.push_str(&format!(
        "[{keyed}][edges]blend=all_mode=multiply:all_opacity={EDGE_BLEND_OPACITY}[enhanced];"
    ));
    graph.push_str(&format!("[enhanced]{FINAL_BLUR}"));

    graph
}

/// Full `-vf` graph for the given options.
pub fn build_filter_graph(opts: &ConvertOptions) -> String {
    let key = if opts.edge_enhancement {
        enhanced_key_graph(opts)
    } else {
        colorkey(opts.color, opts.similarity(), opts.blend())
    };

    match opts.watermark_region() {
        Some(region) => format!("{}{}", watermark_prefix(&region), key),
        None => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> ConvertOptions {
        ConvertOptions {
            edge_enhancement: false,
            remove_watermark: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_simple_colorkey() {
        assert_eq!(
            build_filter_graph(&plain()),
            "colorkey=color=0x000000:similarity=0.10:blend=0.05"
        );
    }

    #[test]
    fn test_enhanced_graph_stage_order() {
        let opts = ConvertOptions {
            remove_watermark: false,
            ..Default::default()
        };
        let graph = build_filter_graph(&opts);

        assert_eq!(
            graph,
            concat!(
                "split=2[main][edge];",
                "[edge]edgedetect=mode=canny:low=0.10:high=0.40[edges];",
                "[main]colorkey=color=0x000000:similarity=0.10:blend=0.05[main1];",
                "[main1]colorkey=color=0x0a0a0a:similarity=0.15:blend=0.03[main2];",
                "[main2]erosion=coordinates=1[main3];",
                "[main3]dilation=coordinates=1[main4];",
                "[main4][edges]blend=all_mode=multiply:all_opacity=0.3[enhanced];",
                "[enhanced]gblur=sigma=0.8:steps=1"
            )
        );
    }

    #[test]
    fn test_morphology_only_adds_erosion_and_dilation() {
        let base = ConvertOptions {
            remove_watermark: false,
            morphology_iterations: 0,
            ..Default::default()
        };
        let with_morph = ConvertOptions {
            morphology_iterations: 3,
            ..base.clone()
        };

        let without = build_filter_graph(&base);
        let with = build_filter_graph(&with_morph);

        assert!(!without.contains("erosion"));
        assert!(!without.contains("dilation"));
        assert!(without.contains("[main2][edges]blend"));

        let expected = without.replace(
            "[main2][edges]blend",
            concat!(
                "[main2]erosion=coordinates=1[main3];",
                "[main3]dilation=coordinates=3[main4];",
                "[main4][edges]blend"
            ),
        );
        assert_eq!(with, expected);
    }

    #[test]
    fn test_watermark_prefix_precedes_keying() {
        let opts = ConvertOptions {
            edge_enhancement: false,
            ..Default::default()
        };
        let graph = build_filter_graph(&opts);

        assert!(graph.starts_with(
            "delogo=x=iw*0.0120:y=ih*0.0120:w=iw*0.1400:h=ih*0.0550:t=8:show=0,format=rgba,"
        ));
        assert!(graph.contains("drawbox=x=iw*0.0120:y=ih*0.0120:w=iw*0.1400:h=ih*0.0550:color=black@0:t=fill,"));
        assert!(graph.ends_with("colorkey=color=0x000000:similarity=0.10:blend=0.05"));
        assert!(graph.find("drawbox").unwrap() < graph.find("colorkey").unwrap());
    }

    #[test]
    fn test_custom_color_and_clamped_residue() {
        let opts = ConvertOptions {
            color: KeyColor::new(0, 255, 0),
            tolerance: 100.0,
            feather: 0.0,
            remove_watermark: false,
            morphology_iterations: 0,
            ..Default::default()
        };
        let graph = build_filter_graph(&opts);

        assert!(graph.contains("[main]colorkey=color=0x00ff00:similarity=1.00:blend=0.00[main1]"));
        assert!(graph.contains("[main1]colorkey=color=0x0a0a0a:similarity=0.95:blend=0.01[main2]"));
    }

    #[test]
    fn test_deterministic() {
        let opts = ConvertOptions::default();
        assert_eq!(build_filter_graph(&opts), build_filter_graph(&opts.clone()));
    }
}
