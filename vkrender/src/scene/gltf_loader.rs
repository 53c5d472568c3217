// glTF 2.0 ingest via the real `gltf` crate -- parsing a glTF document by
// hand is explicitly out of scope. Enrichment pattern (external crate for
// glTF, not a hand-rolled parser) is grounded on panxinmiao-myth's use of an
// external glTF crate; the upload sequencing this loader drives is grounded
// on backend/Image.cpp and renderer/* in the original C++ implementation.
//
// Sections are instantiated while walking the node hierarchy, not while
// walking meshes: a mesh referenced by several nodes must produce one
// Section per node, each carrying that node's own flat world transform.

use cgmath::{Matrix4, SquareMatrix, Vector3};
use std::path::Path;

use crate::error::{RenderError, Result};
use crate::scene::types::{AnimationRef, BoundingBox, DecodedImage, Material, Node, PointLight, Scene, Section, SpotLight};

/// A mesh primitive's immutable GPU-stream footprint, built once per
/// `gltf::Mesh` and instantiated into a `Section` for every node that
/// references that mesh.
struct PrimTemplate {
    first_index: u32,
    index_count: u32,
    material: u32,
    bounds: BoundingBox,
}

pub fn load(path: &Path) -> Result<Scene> {
    let (doc, buffers, images) = gltf::import(path)
        .map_err(|e| RenderError::SceneLoad(format!("{:?}: {}", path, e)))?;

    let mut scene = Scene {
        nodes: Vec::new(),
        sections: Vec::new(),
        materials: Vec::new(),
        point_lights: Vec::new(),
        spot_lights: Vec::new(),
        animations: Vec::new(),
        positions: Vec::new(),
        normals: Vec::new(),
        tangents: Vec::new(),
        uvs: Vec::new(),
        indices: Vec::new(),
        images: Vec::new(),
        image_is_srgb: Vec::new(),
    };

    let mut image_is_srgb = vec![false; images.len()];
    for mat in doc.materials() {
        let pbr = mat.pbr_metallic_roughness();
        let base_color_image = pbr.base_color_texture().map(|t| t.texture().source().index() as u32);
        let metallic_roughness_image = pbr.metallic_roughness_texture().map(|t| t.texture().source().index() as u32);
        let normal_image = mat.normal_texture().map(|t| t.texture().source().index() as u32);
        let normal_scale = mat.normal_texture().map(|t| t.scale()).unwrap_or(1.0);
        let emissive = mat.emissive_factor();
        let emissive_strength = emissive[0].max(emissive[1]).max(emissive[2]);

        if let Some(idx) = base_color_image {
            if let Some(flag) = image_is_srgb.get_mut(idx as usize) {
                *flag = true;
            }
        }

        scene.materials.push(Material {
            base_color_factor: pbr.base_color_factor(),
            metallic_factor: pbr.metallic_factor(),
            roughness_factor: pbr.roughness_factor(),
            normal_scale,
            emissive_strength,
            base_color_image,
            metallic_roughness_image,
            normal_image,
        });
    }
    scene.images = images.iter().map(to_rgba8).collect();
    scene.image_is_srgb = image_is_srgb;

    let mut mesh_templates: Vec<Vec<PrimTemplate>> = Vec::with_capacity(doc.meshes().len());
    for mesh in doc.meshes() {
        let mut templates = Vec::new();
        for prim in mesh.primitives() {
            if prim.mode() != gltf::mesh::Mode::Triangles {
                return Err(RenderError::SceneLoad(format!(
                    "{:?}: mesh {} primitive {} uses non-triangle topology {:?}",
                    path,
                    mesh.index(),
                    prim.index(),
                    prim.mode()
                )));
            }

            let reader = prim.reader(|b| Some(&buffers[b.index()]));
            let positions: Vec<[f32; 3]> = reader
                .read_positions()
                .ok_or_else(|| missing_attribute(path, mesh.index(), prim.index(), "POSITION"))?
                .collect();
            let normals: Vec<[f32; 3]> = reader
                .read_normals()
                .ok_or_else(|| missing_attribute(path, mesh.index(), prim.index(), "NORMAL"))?
                .collect();
            let tangents: Vec<[f32; 4]> = reader
                .read_tangents()
                .ok_or_else(|| missing_attribute(path, mesh.index(), prim.index(), "TANGENT"))?
                .collect();
            let uvs: Vec<[f32; 2]> = reader
                .read_tex_coords(0)
                .ok_or_else(|| missing_attribute(path, mesh.index(), prim.index(), "TEXCOORD_0"))?
                .into_f32()
                .collect();
            let local_indices: Vec<u32> = reader
                .read_indices()
                .ok_or_else(|| missing_attribute(path, mesh.index(), prim.index(), "indices"))?
                .into_u32()
                .collect();

            let base_vertex = scene.positions.len() as u32;
            let first_index = scene.indices.len() as u32;

            let mut bounds = BoundingBox::empty();
            for p in &positions {
                bounds = bounds.union(&BoundingBox {
                    min: Vector3::new(p[0], p[1], p[2]),
                    max: Vector3::new(p[0], p[1], p[2]),
                });
            }

            scene.indices.extend(local_indices.iter().map(|i| i + base_vertex));
            scene.positions.extend(positions);
            scene.normals.extend(normals);
            scene.tangents.extend(tangents);
            scene.uvs.extend(uvs);

            templates.push(PrimTemplate {
                first_index,
                index_count: scene.indices.len() as u32 - first_index,
                material: prim.material().index().unwrap_or(0) as u32,
                bounds,
            });
        }
        mesh_templates.push(templates);
    }

    let node_mesh: Vec<Option<usize>> = doc.nodes().map(|n| n.mesh().map(|m| m.index())).collect();

    for node in doc.nodes() {
        let transform = Matrix4::from(node.transform().matrix());

        if let Some(light) = node.light() {
            let (x, y, z) = {
                let t = node.transform().decomposed();
                (t.0[0], t.0[1], t.0[2])
            };
            let position = Vector3::new(x, y, z);
            let color = Vector3::new(light.color()[0], light.color()[1], light.color()[2]);
            match light.kind() {
                gltf::khr_lights_punctual::Kind::Point => scene.point_lights.push(PointLight {
                    position,
                    color,
                    intensity: light.intensity(),
                    range: light.range(),
                }),
                gltf::khr_lights_punctual::Kind::Spot {
                    inner_cone_angle,
                    outer_cone_angle,
                } => scene.spot_lights.push(SpotLight {
                    position,
                    direction: Vector3::new(0.0, 0.0, -1.0),
                    color,
                    intensity: light.intensity(),
                    inner_cone: inner_cone_angle,
                    outer_cone: outer_cone_angle,
                }),
                gltf::khr_lights_punctual::Kind::Directional => {}
            }
        }

        scene.nodes.push(Node {
            transform,
            mesh_sections: Vec::new(),
            children: node.children().map(|c| c.index() as u32).collect(),
            animation: None,
        });
    }

    let mut is_child = vec![false; scene.nodes.len()];
    for node in &scene.nodes {
        for &c in &node.children {
            is_child[c as usize] = true;
        }
    }
    let roots: Vec<u32> = (0..scene.nodes.len() as u32).filter(|&i| !is_child[i as usize]).collect();
    for root in roots {
        instantiate_sections(root, Matrix4::identity(), &mut scene, &node_mesh, &mesh_templates);
    }

    sort_sections_by_material(&mut scene);

    for (i, anim) in doc.animations().enumerate() {
        let target_node = anim
            .channels()
            .next()
            .map(|c| c.target().node().index() as u32)
            .unwrap_or(0);
        scene.animations.push(AnimationRef {
            name: anim.name().map(|s| s.to_string()).unwrap_or_else(|| format!("anim_{}", i)),
            target_node,
        });
    }

    Ok(scene)
}

fn missing_attribute(path: &Path, mesh_index: usize, prim_index: usize, attr: &str) -> RenderError {
    RenderError::SceneLoad(format!(
        "{:?}: mesh {} primitive {} is missing required attribute {}",
        path, mesh_index, prim_index, attr
    ))
}

/// Walks the node hierarchy from `node_idx` accumulating `parent_world *
/// local`, pushing one `Section` per primitive template for every node
/// that carries a mesh and recording the resulting flat section indices
/// into that node's `mesh_sections`.
fn instantiate_sections(
    node_idx: u32,
    parent_world: Matrix4<f32>,
    scene: &mut Scene,
    node_mesh: &[Option<usize>],
    mesh_templates: &[Vec<PrimTemplate>],
) {
    let local = scene.nodes[node_idx as usize].transform;
    let world = parent_world * local;

    if let Some(mesh_idx) = node_mesh[node_idx as usize] {
        let templates = &mesh_templates[mesh_idx];
        let mut section_indices = Vec::with_capacity(templates.len());
        for t in templates {
            let idx = scene.sections.len() as u32;
            scene.sections.push(Section {
                first_index: t.first_index,
                index_count: t.index_count,
                material: t.material,
                bounds: t.bounds,
                transform: world,
            });
            section_indices.push(idx);
        }
        scene.nodes[node_idx as usize].mesh_sections = section_indices;
    }

    let children = scene.nodes[node_idx as usize].children.clone();
    for child in children {
        instantiate_sections(child, world, scene, node_mesh, mesh_templates);
    }
}

/// Groups draws by material so the PBR pass can batch consecutive
/// `DrawCommandBuffer` entries under one pipeline/descriptor bind. Node
/// `mesh_sections` indices are remapped through the resulting permutation
/// since they were recorded against the pre-sort order.
fn sort_sections_by_material(scene: &mut Scene) {
    let mut order: Vec<u32> = (0..scene.sections.len() as u32).collect();
    order.sort_by_key(|&i| scene.sections[i as usize].material);

    let mut old_to_new = vec![0u32; scene.sections.len()];
    for (new_idx, &old_idx) in order.iter().enumerate() {
        old_to_new[old_idx as usize] = new_idx as u32;
    }

    scene.sections = order.into_iter().map(|i| scene.sections[i as usize].clone()).collect();
    for node in &mut scene.nodes {
        for s in &mut node.mesh_sections {
            *s = old_to_new[*s as usize];
        }
    }
}

/// Normalizes whatever pixel format the glTF image decoder produced into
/// flat RGBA8, the only format `ImageUploader::load_2d_from_bytes` accepts.
/// 16-bit channels are truncated to their high byte.
fn to_rgba8(img: &gltf::image::Data) -> DecodedImage {
    use gltf::image::Format;
    let rgba8 = match img.format {
        Format::R8 => img.pixels.iter().flat_map(|&r| [r, r, r, 255]).collect(),
        Format::R8G8 => img.pixels.chunks_exact(2).flat_map(|c| [c[0], c[1], 0, 255]).collect(),
        Format::R8G8B8 => img.pixels.chunks_exact(3).flat_map(|c| [c[0], c[1], c[2], 255]).collect(),
        Format::R8G8B8A8 => img.pixels.clone(),
        Format::B8G8R8 => img.pixels.chunks_exact(3).flat_map(|c| [c[2], c[1], c[0], 255]).collect(),
        Format::B8G8R8A8 => img.pixels.chunks_exact(4).flat_map(|c| [c[2], c[1], c[0], c[3]]).collect(),
        Format::R16 => img.pixels.chunks_exact(2).flat_map(|c| [c[1], c[1], c[1], 255]).collect(),
        Format::R16G16 => img.pixels.chunks_exact(4).flat_map(|c| [c[1], c[3], 0, 255]).collect(),
        Format::R16G16B16 => img.pixels.chunks_exact(6).flat_map(|c| [c[1], c[3], c[5], 255]).collect(),
        Format::R16G16B16A16 => img.pixels.chunks_exact(8).flat_map(|c| [c[1], c[3], c[5], c[7]]).collect(),
    };
    DecodedImage {
        width: img.width,
        height: img.height,
        rgba8,
    }
}
