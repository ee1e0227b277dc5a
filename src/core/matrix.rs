/// Dense matrices with 1 to MAXDIM dimensions.
///
/// Each dimension carries a lower bound and a size; storage is a single
/// row-major element vector. Matrices are shared by handle; writers clone
/// the structure first when the handle is aliased (see vm.rs).

use crate::core::value::Value;
use crate::errors::ExecError;

pub const MAXDIM: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatDim {
    pub lo: i64,
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct Matrix {
    pub dims: Vec<MatDim>,
    pub elems: Vec<Value>,
}

impl Matrix {
    pub fn new(dims: Vec<MatDim>) -> Result<Self, ExecError> {
        if dims.is_empty() || dims.len() > MAXDIM {
            return Err(ExecError::domain(format!(
                "matrix must have 1 to {} dimensions",
                MAXDIM
            )));
        }
        let mut total = 1usize;
        for d in &dims {
            total = total
                .checked_mul(d.size)
                .ok_or_else(|| ExecError::domain("matrix too large"))?;
        }
        if total > 1 << 24 {
            return Err(ExecError::domain("matrix too large"));
        }
        Ok(Matrix {
            dims,
            elems: vec![Value::null(); total],
        })
    }

    pub fn dim(&self) -> usize {
        self.dims.len()
    }

    pub fn total(&self) -> usize {
        self.elems.len()
    }

    /// Row-major offset for a full multi-dimensional index, checked
    /// against each dimension's lower bound and size.
    pub fn offset(&self, indices: &[Value]) -> Result<usize, ExecError> {
        if indices.len() != self.dims.len() {
            return Err(ExecError::domain(format!(
                "matrix index has {} dimension(s), matrix has {}",
                indices.len(),
                self.dims.len()
            )));
        }
        let mut offset = 0usize;
        for (v, d) in indices.iter().zip(&self.dims) {
            let i = v
                .as_index()
                .ok_or_else(|| ExecError::typ("non-integer matrix index"))?;
            if i < d.lo || i >= d.lo + d.size as i64 {
                return Err(ExecError::domain(format!(
                    "matrix index {} out of bounds [{}, {}]",
                    i,
                    d.lo,
                    d.lo + d.size as i64 - 1
                )));
            }
            offset = offset * d.size + (i - d.lo) as usize;
        }
        Ok(offset)
    }

    /// Fast-index offset: the matrix viewed as a linear buffer.
    pub fn fast_offset(&self, k: i64) -> Result<usize, ExecError> {
        if k < 0 || k as usize >= self.elems.len() {
            return Err(ExecError::domain(format!(
                "fast index {} out of bounds [0, {}]",
                k,
                self.elems.len() as i64 - 1
            )));
        }
        Ok(k as usize)
    }

    pub fn fill(&mut self, v: &Value) {
        for e in self.elems.iter_mut() {
            *e = v.clone();
        }
    }

    /// Combine two same-shaped matrices element by element.
    pub fn zip_with<F>(&self, other: &Self, mut f: F) -> Result<Self, ExecError>
    where
        F: FnMut(&Value, &Value) -> Result<Value, ExecError>,
    {
        if self.dims != other.dims {
            return Err(ExecError::typ("matrix shapes differ"));
        }
        let mut out = self.clone();
        for (dst, src) in out.elems.iter_mut().zip(&other.elems) {
            *dst = f(dst, src)?;
        }
        Ok(out)
    }

    pub fn map<F>(&self, mut f: F) -> Result<Self, ExecError>
    where
        F: FnMut(&Value) -> Result<Value, ExecError>,
    {
        let mut out = self.clone();
        for e in out.elems.iter_mut() {
            *e = f(e)?;
        }
        Ok(out)
    }

    /// Matrix product of two 2-dimensional matrices.
    pub fn matmul<F, G>(&self, other: &Self, mut mul: F, mut add: G) -> Result<Self, ExecError>
    where
        F: FnMut(&Value, &Value) -> Result<Value, ExecError>,
        G: FnMut(&Value, &Value) -> Result<Value, ExecError>,
    {
        if self.dim() != 2 || other.dim() != 2 {
            return Err(ExecError::typ("matrix product needs 2-dimensional operands"));
        }
        let (r, k1) = (self.dims[0].size, self.dims[1].size);
        let (k2, c) = (other.dims[0].size, other.dims[1].size);
        if k1 != k2 {
            return Err(ExecError::typ("matrix product shapes do not match"));
        }
        let mut out = Matrix::new(vec![
            MatDim { lo: self.dims[0].lo, size: r },
            MatDim { lo: other.dims[1].lo, size: c },
        ])?;
        for i in 0..r {
            for j in 0..c {
                let mut acc = Value::null();
                for k in 0..k1 {
                    let p = mul(&self.elems[i * k1 + k], &other.elems[k * c + j])?;
                    acc = if k == 0 { p } else { add(&acc, &p)? };
                }
                out.elems[i * c + j] = acc;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_respect_lower_bounds() {
        let m = Matrix::new(vec![MatDim { lo: 1, size: 3 }, MatDim { lo: 0, size: 2 }]).unwrap();
        assert_eq!(m.offset(&[Value::int(1), Value::int(0)]).unwrap(), 0);
        assert_eq!(m.offset(&[Value::int(3), Value::int(1)]).unwrap(), 5);
        assert!(m.offset(&[Value::int(0), Value::int(0)]).is_err());
        assert!(m.offset(&[Value::int(1)]).is_err());
    }

    #[test]
    fn fast_index_is_linear() {
        let m = Matrix::new(vec![MatDim { lo: 5, size: 4 }]).unwrap();
        assert_eq!(m.fast_offset(3).unwrap(), 3);
        assert!(m.fast_offset(4).is_err());
        assert!(m.fast_offset(-1).is_err());
    }
}
