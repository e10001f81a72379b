// debug.rs - Debug dumps of tile input geometry and built meshes
//
// .obj holds the solid and liquid input triangles, .pmesh and .dmesh are raw
// little-endian dumps of the merged polygon and detail meshes.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use mmap_recast::{PolyMesh, PolyMeshDetail};

use crate::mesh_data::MeshData;

pub fn write_obj(path: &Path, mesh: &MeshData) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);

    for v in mesh.solid_verts.chunks_exact(3).chain(mesh.liquid_verts.chunks_exact(3)) {
        writeln!(w, "v {} {} {}", v[0], v[1], v[2])?;
    }

    // faces are 1-based, liquid vertices follow the solid ones
    for t in mesh.solid_tris.chunks_exact(3) {
        writeln!(w, "f {} {} {}", t[0] + 1, t[1] + 1, t[2] + 1)?;
    }
    let offset = mesh.solid_vert_count() as i32 + 1;
    for t in mesh.liquid_tris.chunks_exact(3) {
        writeln!(w, "f {} {} {}", t[0] + offset, t[1] + offset, t[2] + offset)?;
    }

    w.flush()
}

pub fn write_poly_mesh(path: &Path, mesh: &PolyMesh) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);

    w.write_f32::<LittleEndian>(mesh.cs)?;
    w.write_f32::<LittleEndian>(mesh.ch)?;
    w.write_i32::<LittleEndian>(mesh.nvp as i32)?;
    for v in mesh.bmin.iter().chain(mesh.bmax.iter()) {
        w.write_f32::<LittleEndian>(*v)?;
    }

    w.write_i32::<LittleEndian>(mesh.nverts() as i32)?;
    write_u16s(&mut w, &mesh.verts)?;

    w.write_i32::<LittleEndian>(mesh.npolys() as i32)?;
    write_u16s(&mut w, &mesh.polys)?;
    write_u16s(&mut w, &mesh.flags)?;
    w.write_all(&mesh.areas)?;
    write_u16s(&mut w, &mesh.regs)?;

    w.flush()
}

pub fn write_detail_mesh(path: &Path, mesh: &PolyMeshDetail) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);

    w.write_i32::<LittleEndian>(mesh.nverts() as i32)?;
    for v in &mesh.verts {
        w.write_f32::<LittleEndian>(*v)?;
    }

    w.write_i32::<LittleEndian>(mesh.ntris() as i32)?;
    w.write_all(&mesh.tris)?;

    w.write_i32::<LittleEndian>(mesh.meshes.len() as i32)?;
    for m in &mesh.meshes {
        for v in m {
            w.write_u32::<LittleEndian>(*v)?;
        }
    }

    w.flush()
}

fn write_u16s<W: Write>(w: &mut W, values: &[u16]) -> io::Result<()> {
    for v in values {
        w.write_u16::<LittleEndian>(*v)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn obj_offsets_liquid_faces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0013232.obj");

        let mut mesh = MeshData::default();
        let tri = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        mesh.add_solid(&tri, &[[0, 1, 2]], false);
        mesh.add_liquid(&tri, &[[0, 1, 2]], 9);
        write_obj(&path, &mesh).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.iter().filter(|l| l.starts_with("v ")).count(), 6);
        assert_eq!(lines[6], "f 1 2 3");
        assert_eq!(lines[7], "f 4 5 6");
    }

    #[test]
    fn mesh_dump_sizes() {
        let dir = tempfile::tempdir().unwrap();

        let pmesh = PolyMesh {
            verts: vec![0, 0, 0, 4, 0, 0, 4, 0, 4],
            polys: vec![0, 1, 2, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff],
            regs: vec![1],
            flags: vec![11],
            areas: vec![11],
            nvp: 6,
            ..Default::default()
        };
        let ppath = dir.path().join("t.pmesh");
        write_poly_mesh(&ppath, &pmesh).unwrap();
        // header 36, verts 4 + 18, polys 4 + 24, flags 2, areas 1, regs 2
        assert_eq!(fs::metadata(&ppath).unwrap().len(), 36 + 22 + 28 + 2 + 1 + 2);

        let dmesh = PolyMeshDetail { meshes: vec![[0, 3, 0, 1]], verts: vec![0.0; 9], tris: vec![0, 1, 2, 0] };
        let dpath = dir.path().join("t.dmesh");
        write_detail_mesh(&dpath, &dmesh).unwrap();
        assert_eq!(fs::metadata(&dpath).unwrap().len(), 4 + 36 + 4 + 4 + 4 + 16);
    }
}
