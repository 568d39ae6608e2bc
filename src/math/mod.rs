//! Column-major 4x4 matrix helpers for per-eye view/projection matrices.
//!
//! `Mat4` is indexed `[column][row]`, which is the layout
//! `glUniformMatrix4fv(.., GL_FALSE, ..)` expects.

use crate::vr::{Fov, Pose};
use serde::{Deserialize, Serialize};

pub type Mat4 = [[f32; 4]; 4];

pub const IDENTITY: Mat4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Clip-space convention of the target graphics API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphicsApi {
    Vulkan,
    #[default]
    OpenGl,
    OpenGlEs,
    D3d,
}

impl GraphicsApi {
    /// Y points down in clip space.
    fn flips_height(self) -> bool {
        matches!(self, GraphicsApi::Vulkan)
    }

    /// Depth offset: `near` for [-1, 1] clip depth, 0 for [0, 1].
    fn depth_offset(self, near: f32) -> f32 {
        match self {
            GraphicsApi::OpenGl | GraphicsApi::OpenGlEs => near,
            GraphicsApi::Vulkan | GraphicsApi::D3d => 0.0,
        }
    }
}

/// Element at `row`, `col` of a column-major matrix.
pub fn element(m: &Mat4, row: usize, col: usize) -> f32 {
    m[col][row]
}

/// Flattens a matrix into the 16 contiguous floats GL uniforms take.
pub fn as_floats(m: &Mat4) -> &[f32; 16] {
    bytemuck::cast_ref(m)
}

/// Rigid transform of `pose`: rotation block from the quaternion,
/// translation in the last column.
pub fn pose_to_matrix(pose: &Pose) -> Mat4 {
    let q = pose.orientation;
    let x2 = q.x + q.x;
    let y2 = q.y + q.y;
    let z2 = q.z + q.z;

    let xx2 = q.x * x2;
    let yy2 = q.y * y2;
    let zz2 = q.z * z2;

    let yz2 = q.y * z2;
    let wx2 = q.w * x2;
    let xy2 = q.x * y2;
    let wz2 = q.w * z2;
    let xz2 = q.x * z2;
    let wy2 = q.w * y2;

    let p = pose.position;
    [
        [1.0 - yy2 - zz2, xy2 + wz2, xz2 - wy2, 0.0],
        [xy2 - wz2, 1.0 - xx2 - zz2, yz2 + wx2, 0.0],
        [xz2 + wy2, yz2 - wx2, 1.0 - xx2 - yy2, 0.0],
        [p.x, p.y, p.z, 1.0],
    ]
}

/// Inverse of a rotation+translation matrix. Only valid for rigid
/// transforms; anything with scale or shear gives a meaningless result.
pub fn invert_orthogonal(m: &Mat4) -> Mat4 {
    let t = m[3];
    let mut out = IDENTITY;
    for col in 0..3 {
        for row in 0..3 {
            out[col][row] = m[row][col];
        }
    }
    for row in 0..3 {
        out[3][row] = -(m[row][0] * t[0] + m[row][1] * t[1] + m[row][2] * t[2]);
    }
    out
}

/// `a * b`.
pub fn multiply(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut out = [[0.0; 4]; 4];
    for (col, out_col) in out.iter_mut().enumerate() {
        for (row, value) in out_col.iter_mut().enumerate() {
            *value = (0..4).map(|k| a[k][row] * b[col][k]).sum();
        }
    }
    out
}

/// Asymmetric frustum from four tangents. `far <= near` places the far
/// plane at infinity.
pub fn projection_from_fov(
    tan_left: f32,
    tan_right: f32,
    tan_up: f32,
    tan_down: f32,
    near: f32,
    far: f32,
    api: GraphicsApi,
) -> Mat4 {
    let tan_width = tan_right - tan_left;
    let tan_height = if api.flips_height() {
        tan_down - tan_up
    } else {
        tan_up - tan_down
    };
    let offset = api.depth_offset(near);

    let (z_scale, z_translate) = if far <= near {
        (-1.0, -(near + offset))
    } else {
        (
            -(far + offset) / (far - near),
            -(far * (near + offset)) / (far - near),
        )
    };

    [
        [2.0 / tan_width, 0.0, 0.0, 0.0],
        [0.0, 2.0 / tan_height, 0.0, 0.0],
        [
            (tan_right + tan_left) / tan_width,
            (tan_up + tan_down) / tan_height,
            z_scale,
            -1.0,
        ],
        [0.0, 0.0, z_translate, 0.0],
    ]
}

/// [`projection_from_fov`] for runtime-reported angles in radians.
pub fn projection_from_fov_angles(fov: &Fov, near: f32, far: f32, api: GraphicsApi) -> Mat4 {
    projection_from_fov(
        fov.angle_left.tan(),
        fov.angle_right.tan(),
        fov.angle_up.tan(),
        fov.angle_down.tan(),
        near,
        far,
        api,
    )
}

/// Projection times the inverse eye pose: the matrix a view renders with.
pub fn view_projection(pose: &Pose, fov: &Fov, near: f32, far: f32, api: GraphicsApi) -> Mat4 {
    let projection = projection_from_fov_angles(fov, near, far, api);
    let view = invert_orthogonal(&pose_to_matrix(pose));
    multiply(&projection, &view)
}

/// Applies `m` to a point, returning homogeneous coordinates.
pub fn transform_point(m: &Mat4, point: [f32; 3]) -> [f32; 4] {
    let v = [point[0], point[1], point[2], 1.0];
    let mut out = [0.0; 4];
    for (row, value) in out.iter_mut().enumerate() {
        *value = (0..4).map(|k| m[k][row] * v[k]).sum();
    }
    out
}
