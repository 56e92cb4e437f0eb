use egui::{FontId, Painter, Pos2, Rect, Shape, Stroke, Vec2};

use super::scene::{ScenePrimitive, StrokeStyle, TreeScene};

/// Paint a scene onto an egui painter. Scene coordinates are device pixels
/// relative to `rect.min`; `pixels_per_point` maps them back to egui points.
pub fn paint_scene(painter: &Painter, rect: Rect, scene: &TreeScene, pixels_per_point: f32) {
    let ppp = pixels_per_point.max(f32::EPSILON);
    let to_points = |p: Pos2| rect.min + p.to_vec2() / ppp;
    let clipped = painter.with_clip_rect(rect);

    for primitive in &scene.primitives {
        match primitive {
            ScenePrimitive::StrokeLine { from, to, style } => {
                let points = [to_points(*from), to_points(*to)];
                let stroke = to_stroke(style, ppp);
                match style.dash {
                    Some((dash, gap)) => {
                        clipped.extend(Shape::dashed_line(&points, stroke, dash / ppp, gap / ppp));
                    }
                    None => {
                        clipped.line_segment(points, stroke);
                    }
                }
            }
            ScenePrimitive::FillCircle {
                center,
                radius,
                color,
            } => {
                clipped.circle_filled(to_points(*center), radius / ppp, *color);
            }
            ScenePrimitive::Text {
                text,
                anchor,
                align,
                size,
                color,
            } => {
                clipped.text(
                    to_points(*anchor),
                    *align,
                    text,
                    FontId::proportional(size / ppp),
                    *color,
                );
            }
        }
    }
}

fn to_stroke(style: &StrokeStyle, ppp: f32) -> Stroke {
    Stroke::new(style.width / ppp, style.color)
}

/// Size in egui points a scene needs.
pub fn scene_size_points(scene: &TreeScene, pixels_per_point: f32) -> Vec2 {
    scene.size / pixels_per_point.max(f32::EPSILON)
}

#[cfg(test)]
mod tests {
    use egui::{vec2, Color32};

    use super::*;

    #[test]
    fn converts_device_pixels_to_points() {
        let scene = TreeScene {
            size: vec2(680.0, 400.0),
            primitives: Vec::new(),
        };
        assert_eq!(scene_size_points(&scene, 2.0), vec2(340.0, 200.0));

        let stroke = to_stroke(
            &StrokeStyle {
                width: 2.0,
                color: Color32::RED,
                dash: None,
            },
            2.0,
        );
        assert_eq!(stroke.width, 1.0);
    }
}
