use std::path::Path;

use anyhow::{anyhow, Result};
use egui::{Align, Align2, Color32};
use log::info;
use svg::node::element::{Circle, Group, Line, Rectangle, Text};
use svg::Document;

use crate::config::color_to_hex;
use crate::tree::scene::{ScenePrimitive, TreeScene};

fn color_opacity(color: Color32) -> f32 {
    (color.a() as f32) / 255.0
}

fn text_anchor(align: Align2) -> &'static str {
    match align.x() {
        Align::Min => "start",
        Align::Center => "middle",
        Align::Max => "end",
    }
}

fn baseline(align: Align2) -> &'static str {
    match align.y() {
        Align::Min => "hanging",
        Align::Center => "middle",
        Align::Max => "auto",
    }
}

fn scene_group(id: &str, scene: &TreeScene, offset_y: f32) -> Group {
    let mut group = Group::new()
        .set("id", id)
        .set("transform", format!("translate(0,{offset_y})"));

    for primitive in &scene.primitives {
        match primitive {
            ScenePrimitive::StrokeLine { from, to, style } => {
                let mut line = Line::new()
                    .set("x1", from.x)
                    .set("y1", from.y)
                    .set("x2", to.x)
                    .set("y2", to.y)
                    .set("stroke", color_to_hex(style.color))
                    .set("stroke-opacity", color_opacity(style.color))
                    .set("stroke-width", style.width);
                if let Some((dash, gap)) = style.dash {
                    line = line.set("stroke-dasharray", format!("{dash},{gap}"));
                }
                group = group.add(line);
            }
            ScenePrimitive::FillCircle {
                center,
                radius,
                color,
            } => {
                group = group.add(
                    Circle::new()
                        .set("cx", center.x)
                        .set("cy", center.y)
                        .set("r", *radius)
                        .set("fill", color_to_hex(*color))
                        .set("fill-opacity", color_opacity(*color)),
                );
            }
            ScenePrimitive::Text {
                text,
                anchor,
                align,
                size,
                color,
            } => {
                let content = svg::node::Text::new(text.clone());
                group = group.add(
                    Text::new("")
                        .set("x", anchor.x)
                        .set("y", anchor.y)
                        .set("font-size", *size)
                        .set("fill", color_to_hex(*color))
                        .set("text-anchor", text_anchor(*align))
                        .set("dominant-baseline", baseline(*align))
                        .add(content),
                );
            }
        }
    }
    group
}

/// Header stacked above body, on a solid background.
pub fn scene_document(header: &TreeScene, body: &TreeScene, background: Color32) -> Document {
    let width = header.size.x.max(body.size.x);
    let height = header.size.y + body.size.y;

    Document::new()
        .set("width", width)
        .set("height", height)
        .set("viewBox", (0, 0, width.ceil() as i32, height.ceil() as i32))
        .add(
            Rectangle::new()
                .set("width", "100%")
                .set("height", "100%")
                .set("fill", color_to_hex(background)),
        )
        .add(scene_group("scale", header, 0.0))
        .add(scene_group("tree", body, header.size.y))
}

pub fn export_svg(path: &Path, header: &TreeScene, body: &TreeScene, background: Color32) -> Result<()> {
    let document = scene_document(header, body, background);
    svg::save(path, &document).map_err(|err| anyhow!("failed to save SVG {}: {err}", path.display()))?;
    info!(
        "Exported {} primitive(s) to {}",
        header.primitives.len() + body.primitives.len(),
        path.display()
    );
    Ok(())
}
