//! Host-side kernel execution: argument access, source scanning and the
//! built-in kernels.

use std::sync::Arc;

use super::HostKernelFn;
use crate::compute::{MemAccess, NdRange, Status};

/// 2D image argument, row-major and tightly packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostImage {
    width: u32,
    height: u32,
    pixel_size: usize,
    data: Vec<u8>,
}

impl HostImage {
    pub(super) fn new(width: u32, height: u32, pixel_size: usize, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixel_size,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_size(&self) -> usize {
        self.pixel_size
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let start = self.offset(x, y);
        &self.data[start..start + self.pixel_size]
    }

    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let start = self.offset(x, y);
        &mut self.data[start..start + self.pixel_size]
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.pixel_size
    }
}

#[derive(Debug)]
pub(super) enum ArgValue {
    Buffer {
        data: Vec<u8>,
        access: MemAccess,
        dirty: bool,
    },
    Image {
        image: HostImage,
        access: MemAccess,
        dirty: bool,
    },
    Scalar(Vec<u8>),
}

/// Arguments of one kernel invocation.
///
/// Memory arguments are snapshots; whatever a kernel writes is stored back
/// into the memory object after it returns.
#[derive(Debug)]
pub struct KernelArgs {
    values: Vec<ArgValue>,
}

impl KernelArgs {
    pub(super) fn new(values: Vec<ArgValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Contents of a buffer argument as `T` elements.
    pub fn read<T: bytemuck::Pod>(&self, index: usize) -> Result<Vec<T>, Status> {
        let size = elem_size::<T>()?;
        match self.value(index)? {
            ArgValue::Buffer { data, .. } => Ok(data
                .chunks_exact(size)
                .map(bytemuck::pod_read_unaligned)
                .collect()),
            _ => Err(Status::INVALID_ARG_VALUE),
        }
    }

    /// Overwrites the start of a buffer argument with `values`.
    pub fn write<T: bytemuck::Pod>(&mut self, index: usize, values: &[T]) -> Result<(), Status> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        match self.value_mut(index)? {
            ArgValue::Buffer {
                data,
                access,
                dirty,
            } => {
                if !access.can_write() {
                    return Err(Status::INVALID_OPERATION);
                }
                let target = data
                    .get_mut(..bytes.len())
                    .ok_or(Status::INVALID_BUFFER_SIZE)?;
                target.copy_from_slice(bytes);
                *dirty = true;
                Ok(())
            }
            _ => Err(Status::INVALID_ARG_VALUE),
        }
    }

    pub fn scalar<T: bytemuck::Pod>(&self, index: usize) -> Result<T, Status> {
        let size = elem_size::<T>()?;
        match self.value(index)? {
            ArgValue::Scalar(bytes) if bytes.len() == size => {
                Ok(bytemuck::pod_read_unaligned(bytes))
            }
            ArgValue::Scalar(_) => Err(Status::INVALID_ARG_SIZE),
            _ => Err(Status::INVALID_ARG_VALUE),
        }
    }

    pub fn image(&self, index: usize) -> Result<&HostImage, Status> {
        match self.value(index)? {
            ArgValue::Image { image, .. } => Ok(image),
            _ => Err(Status::INVALID_ARG_VALUE),
        }
    }

    pub fn image_mut(&mut self, index: usize) -> Result<&mut HostImage, Status> {
        match self.value_mut(index)? {
            ArgValue::Image {
                image,
                access,
                dirty,
            } => {
                if !access.can_write() {
                    return Err(Status::INVALID_OPERATION);
                }
                *dirty = true;
                Ok(image)
            }
            _ => Err(Status::INVALID_ARG_VALUE),
        }
    }

    /// Per argument, the bytes to store back if the kernel wrote them.
    pub(super) fn into_written(self) -> Vec<Option<Vec<u8>>> {
        self.values
            .into_iter()
            .map(|value| match value {
                ArgValue::Buffer {
                    data, dirty: true, ..
                } => Some(data),
                ArgValue::Image {
                    image, dirty: true, ..
                } => Some(image.data),
                _ => None,
            })
            .collect()
    }

    fn value(&self, index: usize) -> Result<&ArgValue, Status> {
        self.values.get(index).ok_or(Status::INVALID_ARG_INDEX)
    }

    fn value_mut(&mut self, index: usize) -> Result<&mut ArgValue, Status> {
        self.values.get_mut(index).ok_or(Status::INVALID_ARG_INDEX)
    }
}

fn elem_size<T>() -> Result<usize, Status> {
    match std::mem::size_of::<T>() {
        0 => Err(Status::INVALID_ARG_SIZE),
        size => Ok(size),
    }
}

/// Kernel declared in program source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSignature {
    pub name: String,
    pub arity: usize,
}

/// Finds `__kernel void name(...)` declarations in compute source.
///
/// Returns the diagnostics as log lines when the source is malformed.
pub fn scan_kernels(source: &str) -> Result<Vec<KernelSignature>, Vec<String>> {
    let text = strip_comments(source);
    let mut errors = Vec::new();

    let mut depth = 0i64;
    for (number, line) in text.lines().enumerate() {
        for c in line.chars() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth < 0 {
                        errors.push(format!("{}: error: extraneous closing brace", number + 1));
                        depth = 0;
                    }
                }
                _ => {}
            }
        }
    }
    if depth > 0 {
        errors.push("error: expected '}' at end of input".to_string());
    }

    let mut kernels = Vec::new();
    let mut rest = text.as_str();
    while let Some(pos) = rest.find("__kernel") {
        let line = text[..text.len() - rest.len() + pos].matches('\n').count() + 1;
        rest = &rest[pos + "__kernel".len()..];
        match parse_declaration(rest) {
            Some((signature, consumed)) => {
                kernels.push(signature);
                rest = &rest[consumed..];
            }
            None => errors.push(format!("{}: error: malformed kernel declaration", line)),
        }
    }

    if errors.is_empty() {
        Ok(kernels)
    } else {
        Err(errors)
    }
}

/// Parses `void name(args)`, returning the signature and bytes consumed.
fn parse_declaration(text: &str) -> Option<(KernelSignature, usize)> {
    let after_void = text.trim_start().strip_prefix("void")?;
    let name_start = after_void.trim_start();
    let name_len = name_start
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(name_start.len());
    if name_len == 0 {
        return None;
    }
    let name = &name_start[..name_len];
    let params = name_start[name_len..].trim_start().strip_prefix('(')?;

    let mut depth = 0usize;
    let mut commas = 0usize;
    let mut end = None;
    for (i, c) in params.char_indices() {
        match c {
            '(' => depth += 1,
            ')' if depth == 0 => {
                end = Some(i);
                break;
            }
            ')' => depth -= 1,
            ',' if depth == 0 => commas += 1,
            _ => {}
        }
    }
    let end = end?;
    let inner = params[..end].trim();
    let arity = if inner.is_empty() || inner == "void" {
        0
    } else {
        commas + 1
    };

    let consumed = text.len() - params.len() + end + 1;
    Some((
        KernelSignature {
            name: name.to_string(),
            arity,
        },
        consumed,
    ))
}

/// Blanks out comments, keeping line structure.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

pub(super) fn standard_kernels() -> Vec<(&'static str, HostKernelFn)> {
    vec![
        ("vecAdd", Arc::new(vec_add) as HostKernelFn),
        ("xyPattern", Arc::new(xy_pattern) as HostKernelFn),
    ]
}

/// `c[i] = a[i] + b[i]` for `i < n`; args `(a, b, c, n: u32)`.
fn vec_add(args: &mut KernelArgs, range: &NdRange) -> Result<(), Status> {
    let a = args.read::<f32>(0)?;
    let b = args.read::<f32>(1)?;
    let mut c = args.read::<f32>(2)?;
    let n = args.scalar::<u32>(3)? as usize;

    let limit = n
        .min(range.global()[0])
        .min(a.len())
        .min(b.len())
        .min(c.len());
    for i in 0..limit {
        c[i] = a[i] + b[i];
    }
    args.write(2, &c)
}

/// Fills every byte of pixel `(x, y)` with `(x + y + frame) mod 256`;
/// args `(image, frame: u32)`.
fn xy_pattern(args: &mut KernelArgs, range: &NdRange) -> Result<(), Status> {
    let frame = args.scalar::<u32>(1)? as usize;
    let [gx, gy, _] = range.global();
    let image = args.image_mut(0)?;
    let width = (image.width() as usize).min(gx);
    let height = (image.height() as usize).min(gy);
    for y in 0..height {
        for x in 0..width {
            let value = ((x + y + frame) % 256) as u8;
            image.pixel_mut(x as u32, y as u32).fill(value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_finds_kernels_and_arity() {
        let source = r#"
            // helper
            float twice(float x) { return 2.0f * x; }
            __kernel void vecAdd(__global float* a, __global float* b,
                                 __global float* c, const unsigned int n)
            {
                int i = get_global_id(0);
                if (i < n) { c[i] = a[i] + b[i]; }
            }
            /* __kernel void ignored(int x) {} */
            __kernel void noArgs(void) {}
        "#;
        let kernels = scan_kernels(source).unwrap();
        assert_eq!(
            kernels,
            vec![
                KernelSignature {
                    name: "vecAdd".into(),
                    arity: 4
                },
                KernelSignature {
                    name: "noArgs".into(),
                    arity: 0
                },
            ]
        );
    }

    #[test]
    fn test_scan_reports_unbalanced_braces() {
        let errors = scan_kernels("__kernel void f(int a) {\n").unwrap_err();
        assert_eq!(errors, vec!["error: expected '}' at end of input".to_string()]);

        let errors = scan_kernels("}\n").unwrap_err();
        assert!(errors[0].starts_with("1: error"));
    }

    #[test]
    fn test_scan_reports_malformed_declaration() {
        let errors = scan_kernels("\n__kernel int f(int a) {}").unwrap_err();
        assert_eq!(errors, vec!["2: error: malformed kernel declaration".to_string()]);
    }

    #[test]
    fn test_vec_add() {
        let a: Vec<f32> = (0..8).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..8).map(|i| (8 - i) as f32).collect();
        let buffer = |v: &[f32], access| ArgValue::Buffer {
            data: bytemuck::cast_slice(v).to_vec(),
            access,
            dirty: false,
        };
        let mut args = KernelArgs::new(vec![
            buffer(&a, MemAccess::ReadOnly),
            buffer(&b, MemAccess::ReadOnly),
            buffer(&[0.0; 8], MemAccess::WriteOnly),
            ArgValue::Scalar(6u32.to_ne_bytes().to_vec()),
        ]);
        vec_add(&mut args, &NdRange::linear(8, 4)).unwrap();

        let written = args.into_written();
        assert!(written[0].is_none());
        let c: Vec<f32> = written[2]
            .as_ref()
            .unwrap()
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_eq!(&c[..6], &[8.0; 6]);
        assert_eq!(&c[6..], &[0.0, 0.0]);
    }

    #[test]
    fn test_write_to_read_only_rejected() {
        let mut args = KernelArgs::new(vec![ArgValue::Buffer {
            data: vec![0; 4],
            access: MemAccess::ReadOnly,
            dirty: false,
        }]);
        assert_eq!(args.write(0, &[1u32]), Err(Status::INVALID_OPERATION));
        assert_eq!(args.scalar::<u32>(0), Err(Status::INVALID_ARG_VALUE));
        assert_eq!(args.read::<u32>(1), Err(Status::INVALID_ARG_INDEX));
    }

    #[test]
    fn test_xy_pattern() {
        let mut args = KernelArgs::new(vec![
            ArgValue::Image {
                image: HostImage::new(4, 3, 4, vec![0; 4 * 3 * 4]),
                access: MemAccess::WriteOnly,
                dirty: false,
            },
            ArgValue::Scalar(1u32.to_ne_bytes().to_vec()),
        ]);
        xy_pattern(&mut args, &NdRange::planar(4, 3)).unwrap();
        let image = args.image(0).unwrap();
        assert_eq!(image.pixel(0, 0), &[1, 1, 1, 1]);
        assert_eq!(image.pixel(3, 2), &[6, 6, 6, 6]);
    }
}
