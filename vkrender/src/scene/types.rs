// CPU-side scene representation.
//
// Mirrors the GPU-facing layout this renderer packs into the section,
// instance, and material storage buffers: each type here has an obvious,
// near-1:1 scalar-layout GPU twin assembled in scene::gpu.

use cgmath::{Matrix4, Vector3, Vector4};

#[derive(Clone, Copy, Debug)]
pub struct BoundingBox {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl BoundingBox {
    pub fn empty() -> Self {
        Self {
            min: Vector3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
            max: Vector3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        }
    }

    /// Union is the monoid operation over bounding boxes: `empty()` is the
    /// identity, and union is associative/commutative.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min: Vector3::new(
                self.min.x.min(other.min.x),
                self.min.y.min(other.min.y),
                self.min.z.min(other.min.z),
            ),
            max: Vector3::new(
                self.max.x.max(other.max.x),
                self.max.y.max(other.max.y),
                self.max.z.max(other.max.z),
            ),
        }
    }

    pub fn centroid(&self) -> Vector3<f32> {
        (self.min + self.max) / 2.0
    }

    pub fn transform(&self, m: Matrix4<f32>) -> BoundingBox {
        let corners = [
            Vector3::new(self.min.x, self.min.y, self.min.z),
            Vector3::new(self.max.x, self.min.y, self.min.z),
            Vector3::new(self.min.x, self.max.y, self.min.z),
            Vector3::new(self.max.x, self.max.y, self.min.z),
            Vector3::new(self.min.x, self.min.y, self.max.z),
            Vector3::new(self.max.x, self.min.y, self.max.z),
            Vector3::new(self.min.x, self.max.y, self.max.z),
            Vector3::new(self.max.x, self.max.y, self.max.z),
        ];

        let mut ret = BoundingBox::empty();
        for c in corners {
            let p = m * Vector4::new(c.x, c.y, c.z, 1.0);
            ret.min.x = ret.min.x.min(p.x);
            ret.min.y = ret.min.y.min(p.y);
            ret.min.z = ret.min.z.min(p.z);
            ret.max.x = ret.max.x.max(p.x);
            ret.max.y = ret.max.y.max(p.y);
            ret.max.z = ret.max.z.max(p.z);
        }
        ret
    }
}

/// One draw-able chunk of a mesh: a contiguous index range sharing a single
/// material, the unit this renderer frustum-culls and draws indirectly.
#[derive(Clone, Debug)]
pub struct Section {
    pub first_index: u32,
    pub index_count: u32,
    pub material: u32,
    pub bounds: BoundingBox,
    pub transform: Matrix4<f32>,
}

#[derive(Clone, Debug)]
pub struct Material {
    pub base_color_factor: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub normal_scale: f32,
    /// Approximated as the max channel of the emissive factor; core glTF has
    /// no scalar emissive-strength field, only `KHR_materials_emissive_strength`.
    pub emissive_strength: f32,
    /// Indices into `Scene::images`, not glTF texture/image indices.
    pub base_color_image: Option<u32>,
    pub metallic_roughness_image: Option<u32>,
    pub normal_image: Option<u32>,
}

/// A decoded, CPU-resident RGBA8 texture awaiting GPU upload.
#[derive(Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba8: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct Node {
    pub transform: Matrix4<f32>,
    pub mesh_sections: Vec<u32>,
    pub children: Vec<u32>,
    /// Opaque reference; animation playback is out of scope, this just
    /// keeps a typed handle alive instead of dangling.
    pub animation: Option<u32>,
}

/// KHR_lights_punctual point light. Parsed and stored but not wired into
/// any renderer pass (see FogLightRenderer/LightRenderer in DESIGN.md).
#[derive(Clone, Copy, Debug)]
pub struct PointLight {
    pub position: Vector3<f32>,
    pub color: Vector3<f32>,
    pub intensity: f32,
    pub range: Option<f32>,
}

#[derive(Clone, Copy, Debug)]
pub struct SpotLight {
    pub position: Vector3<f32>,
    pub direction: Vector3<f32>,
    pub color: Vector3<f32>,
    pub intensity: f32,
    pub inner_cone: f32,
    pub outer_cone: f32,
}

/// Bookkeeping-only animation reference: a name and target node, no
/// keyframe/tween evaluation.
#[derive(Clone, Debug)]
pub struct AnimationRef {
    pub name: String,
    pub target_node: u32,
}

pub struct Scene {
    pub nodes: Vec<Node>,
    pub sections: Vec<Section>,
    pub materials: Vec<Material>,
    pub point_lights: Vec<PointLight>,
    pub spot_lights: Vec<SpotLight>,
    pub animations: Vec<AnimationRef>,
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub tangents: Vec<[f32; 4]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
    pub images: Vec<DecodedImage>,
    /// Parallel to `images`: true if any material samples it as a
    /// base-color/emissive source, requiring an sRGB view format.
    pub image_is_srgb: Vec<bool>,
}

impl Scene {
    pub fn bounds(&self) -> BoundingBox {
        self.sections
            .iter()
            .fold(BoundingBox::empty(), |acc, s| acc.union(&s.bounds.transform(s.transform)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_union_is_commutative_and_has_identity() {
        let a = BoundingBox {
            min: Vector3::new(0.0, 0.0, 0.0),
            max: Vector3::new(1.0, 1.0, 1.0),
        };
        let b = BoundingBox {
            min: Vector3::new(-1.0, -1.0, -1.0),
            max: Vector3::new(0.5, 0.5, 0.5),
        };
        let ab = a.union(&b);
        let ba = b.union(&a);
        assert_eq!(ab.min, ba.min);
        assert_eq!(ab.max, ba.max);

        let with_empty = a.union(&BoundingBox::empty());
        assert_eq!(with_empty.min, a.min);
        assert_eq!(with_empty.max, a.max);
    }
}
