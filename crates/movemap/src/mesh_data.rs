// mesh_data.rs - Per-tile input geometry gathered for one tile build

use std::collections::BTreeMap;

/// Solid, liquid and off-mesh geometry of a tile, in recast axis order (y up)
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub solid_verts: Vec<f32>,
    pub solid_tris: Vec<i32>,

    pub liquid_verts: Vec<f32>,
    pub liquid_tris: Vec<i32>,
    /// Nav area of each liquid triangle
    pub liquid_type: Vec<u8>,

    // off-mesh connections
    pub off_mesh_connections: Vec<f32>,
    pub off_mesh_connection_rads: Vec<f32>,
    pub off_mesh_connection_dirs: Vec<u8>,
    pub off_mesh_connections_areas: Vec<u8>,
    pub off_mesh_connections_flags: Vec<u16>,
}

impl MeshData {
    pub fn has_geometry(&self) -> bool {
        !self.solid_verts.is_empty() || !self.liquid_verts.is_empty()
    }

    pub fn solid_vert_count(&self) -> usize {
        self.solid_verts.len() / 3
    }

    pub fn liquid_vert_count(&self) -> usize {
        self.liquid_verts.len() / 3
    }

    pub fn off_mesh_count(&self) -> usize {
        self.off_mesh_connection_rads.len()
    }

    /// Drop vertices no triangle references
    pub fn clean(&mut self) {
        clean_vertices(&mut self.solid_verts, &mut self.solid_tris);
        clean_vertices(&mut self.liquid_verts, &mut self.liquid_tris);
    }

    /// Liquid and solid vertices in one array, for bounds computation
    pub fn all_verts(&self) -> Vec<f32> {
        let mut all = Vec::with_capacity(self.liquid_verts.len() + self.solid_verts.len());
        all.extend_from_slice(&self.liquid_verts);
        all.extend_from_slice(&self.solid_verts);
        all
    }

    /// Append a solid triangle soup. `flip` reverses the winding.
    pub fn add_solid(&mut self, verts: &[[f32; 3]], tris: &[[u32; 3]], flip: bool) {
        let offset = self.solid_vert_count() as i32;
        for v in verts {
            self.solid_verts.extend_from_slice(v);
        }
        for t in tris {
            let t = if flip { [t[2], t[1], t[0]] } else { *t };
            self.solid_tris.extend(t.iter().map(|&i| i as i32 + offset));
        }
    }

    /// Append liquid triangles that all share one nav area
    pub fn add_liquid(&mut self, verts: &[[f32; 3]], tris: &[[i32; 3]], area: u8) {
        let offset = self.liquid_vert_count() as i32;
        for v in verts {
            self.liquid_verts.extend_from_slice(v);
        }
        for t in tris {
            self.liquid_tris.extend(t.iter().map(|&i| i + offset));
            self.liquid_type.push(area);
        }
    }
}

/// Remove unreferenced vertices and remap triangle indices to the compacted array
pub fn clean_vertices(verts: &mut Vec<f32>, tris: &mut [i32]) {
    if tris.is_empty() {
        verts.clear();
        return;
    }

    let mut vert_map: BTreeMap<i32, i32> = tris.iter().map(|&t| (t, 0)).collect();

    let mut clean = Vec::with_capacity(vert_map.len() * 3);
    for (count, (&index, new_index)) in vert_map.iter_mut().enumerate() {
        *new_index = count as i32;
        let base = index as usize * 3;
        if let Some(v) = verts.get(base..base + 3) {
            clean.extend_from_slice(v);
        }
    }
    *verts = clean;

    for t in tris.iter_mut() {
        if let Some(&new_index) = vert_map.get(t) {
            *t = new_index;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_drops_unused_vertices() {
        let mut verts = vec![0.0, 0.0, 0.0, 9.0, 9.0, 9.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        let mut tris = vec![0, 2, 3];
        clean_vertices(&mut verts, &mut tris);
        assert_eq!(verts, vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(tris, vec![0, 1, 2]);
    }

    #[test]
    fn clean_without_triangles_empties_vertices() {
        let mut mesh = MeshData { liquid_verts: vec![1.0, 2.0, 3.0], ..Default::default() };
        mesh.clean();
        assert!(!mesh.has_geometry());
    }

    #[test]
    fn add_solid_offsets_and_flips() {
        let mut mesh = MeshData::default();
        let tri = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        mesh.add_solid(&tri, &[[0, 1, 2]], false);
        mesh.add_solid(&tri, &[[0, 1, 2]], true);
        assert_eq!(mesh.solid_tris, vec![0, 1, 2, 5, 4, 3]);

        mesh.add_liquid(&tri, &[[0, 1, 2]], 9);
        assert_eq!(mesh.liquid_type, vec![9]);
        assert_eq!(mesh.all_verts().len(), 27);
    }
}
