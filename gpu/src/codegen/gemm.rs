//! Tiled GEMM kernel emission.
//!
//! Emits `C = alpha * op(A) @ op(B) + beta * C` over column-major views.
//! Each work-group owns one `mL × nL` block of C (and one K slice when split
//! depth is on). Every iteration stages a `kL`-deep slab of A and B through
//! local memory between two barriers, then each thread accumulates its
//! `mS × nS` register tile. Ragged K is handled by one predicated tail pass;
//! ragged M and N by clamped fetch pointers plus guarded stores.

use symbolic::NumericType;

use super::keywords::{self, GLOBAL, KERNEL, LOCAL, LOCAL_BARRIER, LOCAL_PTR, SIZE_T};
use super::reduce;
use super::stream::KernelStream;
use crate::params::{GemmParams, Transpose};
use crate::resources::StagingLayout;

/// Name of the main kernel for a program suffix.
pub fn gemm_kernel_name(suffix: &str) -> String {
    format!("gemm{}", suffix)
}

/// Emit the GEMM kernel, followed by its reduction kernel when
/// `params.depth() > 1`.
///
/// `params` must have passed [`validate`](crate::validate::validate); the
/// generator performs no checks of its own.
pub fn generate(params: &GemmParams, dtype: NumericType, suffix: &str) -> String {
    let mut stream = KernelStream::new();
    Emitter::new(params, dtype).emit(&mut stream, suffix);
    let mut text = stream.into_string();
    if params.depth() > 1 {
        text.push('\n');
        text.push_str(&reduce::emit_reduce(dtype, suffix));
    }
    log::debug!(
        "generated gemm{} [{}] for {}: {} bytes",
        suffix,
        params,
        dtype,
        text.len()
    );
    text
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Full `kL` blocks.
    Main,
    /// Remaining `K % kL` columns under predicates.
    Tail,
}

/// `c*name`, folding the trivial coefficients.
fn times(c: u32, name: &str) -> String {
    match c {
        0 => "0".to_string(),
        1 => name.to_string(),
        _ => format!("{}*{}", c, name),
    }
}

/// Sum of terms with zeros dropped.
fn sum(terms: &[String]) -> String {
    let kept: Vec<&str> = terms
        .iter()
        .map(String::as_str)
        .filter(|t| *t != "0")
        .collect();
    if kept.is_empty() {
        "0".to_string()
    } else {
        kept.join(" + ")
    }
}

/// `ptr + offset`, or `ptr` when the offset is zero.
fn at(ptr: &str, offset: &str) -> String {
    if offset == "0" {
        ptr.to_string()
    } else {
        format!("{} + {}", ptr, offset)
    }
}

struct Emitter<'a> {
    p: &'a GemmParams,
    scalar: &'static str,
    vector: String,
    layout: StagingLayout,
}

impl<'a> Emitter<'a> {
    fn new(p: &'a GemmParams, dtype: NumericType) -> Self {
        let scalar = dtype.kernel_name();
        Emitter {
            p,
            scalar,
            vector: keywords::vector_type(scalar, p.vw()),
            layout: StagingLayout::of(p),
        }
    }

    fn llda(&self) -> u32 {
        self.layout.a[0]
    }

    fn lldb(&self) -> u32 {
        self.layout.b[0]
    }

    /// Contiguous copy width along the fast staging axis.
    fn lane_step(&self) -> u32 {
        self.p.lf0() * self.p.vw()
    }

    fn emit(&self, s: &mut KernelStream, suffix: &str) {
        self.signature(s, suffix);
        s.open("");
        self.declarations(s);
        self.identifiers(s);
        self.fetch_pointers(s);

        s.blank().comment("full blocks");
        s.open(format!("while(Kr >= {})", self.p.kl()));
        self.iteration(s, Pass::Main);
        s.line(format!("Kr -= {};", self.p.kl()));
        self.advance(s);
        s.close();

        s.blank().comment("last partial block");
        self.predicates(s);
        self.iteration(s, Pass::Tail);

        self.write_back(s);
        s.close();
    }

    fn signature(&self, s: &mut KernelStream, suffix: &str) {
        let t = self.scalar;
        let name = gemm_kernel_name(suffix);
        s.line(format!("{KERNEL} void {name}({SIZE_T} M, {SIZE_T} N, {SIZE_T} K,"));
        s.inc_tab();
        s.line(format!(
            "{GLOBAL} {t}* C, {SIZE_T} ldc, {SIZE_T} offc, {SIZE_T} Cstride1,"
        ));
        s.line(format!("{t} alpha,"));
        s.line(format!(
            "{GLOBAL} {t}* A, {SIZE_T} lda, {SIZE_T} offa, {SIZE_T} Astride1,"
        ));
        s.line(format!(
            "{GLOBAL} {t}* B, {SIZE_T} ldb, {SIZE_T} offb, {SIZE_T} Bstride1,"
        ));
        s.line(format!("{t} beta)"));
        s.dec_tab();
    }

    fn declarations(&self, s: &mut KernelStream) {
        let p = self.p;
        let (t, vt, vw) = (self.scalar, &self.vector, p.vw());
        s.comment("registers");
        s.line(format!("{} rC[{}][{}] = {{{{0}}}};", t, p.ms(), p.ns()));
        s.line(format!("{} rA[{}][{}];", vt, p.ks(), p.ms() / vw));
        s.line(format!("{} rB[{}][{}];", vt, p.ks(), p.ns() / vw));
        s.comment("staging");
        s.line(format!("{LOCAL} {t} lA[{}];", self.layout.a_len()));
        s.line(format!("{LOCAL} {t} lB[{}];", self.layout.b_len()));
        s.line(format!("{GLOBAL} {t}* Ai[{}];", p.a_fetch_count()));
        s.line(format!("{GLOBAL} {t}* Bi[{}];", p.b_fetch_count()));
    }

    fn identifiers(&self, s: &mut KernelStream) {
        let p = self.p;
        s.comment("identifiers");
        s.line(format!("int gid0 = {};", keywords::group_idx(0)));
        s.line(format!("int gid1 = {};", keywords::group_idx(1)));
        if p.depth() > 1 {
            s.line(format!("int gidz = {};", keywords::group_idx(2)));
        }
        s.line(format!("int lid0 = {};", keywords::local_idx(0)));
        s.line(format!("int lid1 = {};", keywords::local_idx(1)));
        s.line(format!("int idt = {}*lid1 + lid0;", p.ls0()));
        s.line(format!("int fy = idt / {};", p.lf0()));
        if p.vw() == 1 {
            s.line(format!("int fx = idt % {};", p.lf0()));
        } else {
            s.line(format!("int fx = (idt % {})*{};", p.lf0(), p.vw()));
        }
        s.line(format!("int row0 = gid0*{};", p.ml()));
        s.line(format!("int col0 = gid1*{};", p.nl()));
        s.line("int Kr = K;");
        if p.depth() > 1 {
            s.comment("K slice of this group");
            s.line(format!("int div = (Kr + {})/{};", p.depth() - 1, p.depth()));
            s.line("int offz = div*gidz;");
            s.line("Kr = max(min(Kr - offz, div), 0);");
        }
    }

    fn fetch_pointers(&self, s: &mut KernelStream) {
        let p = self.p;
        let split = p.depth() > 1;
        s.comment("fetch pointers");
        s.line("A += offa;");
        s.line("B += offb;");
        s.line("C += offc;");
        match p.a_trans() {
            Transpose::N => {
                s.line("A += row0*Astride1 + fy*lda;");
                if split {
                    s.line("A += offz*lda;");
                }
            }
            Transpose::T => {
                s.line("A += row0*lda + fx*Astride1;");
                if split {
                    s.line("A += offz*Astride1;");
                }
            }
        }
        match p.b_trans() {
            Transpose::T => {
                s.line("B += col0*Bstride1 + fy*ldb;");
                if split {
                    s.line("B += offz*ldb;");
                }
            }
            Transpose::N => {
                s.line("B += col0*ldb + fx*Bstride1;");
                if split {
                    s.line("B += offz*Bstride1;");
                }
            }
        }
        s.line("int Ma = (int)M - row0;");
        s.line("int Nb = (int)N - col0;");

        // Pointers past the edge fall back to the block origin, which is
        // always in range; the values they load are never stored.
        for i in 0..p.a_fetch_count() {
            let (first, pitch, step) = match p.a_trans() {
                Transpose::N => ("fx", "Astride1", self.lane_step()),
                Transpose::T => ("fy", "lda", p.lf1()),
            };
            let line = at(first, &(i * step).to_string());
            s.line(format!(
                "Ai[{i}] = A + (({line} < Ma) ? ({line})*{pitch} : 0);"
            ));
        }
        for i in 0..p.b_fetch_count() {
            let (first, pitch, step) = match p.b_trans() {
                Transpose::T => ("fx", "Bstride1", self.lane_step()),
                Transpose::N => ("fy", "ldb", p.lf1()),
            };
            let line = at(first, &(i * step).to_string());
            s.line(format!(
                "Bi[{i}] = B + (({line} < Nb) ? ({line})*{pitch} : 0);"
            ));
        }
    }

    /// One staging iteration: barrier, cooperative copy, barrier, compute.
    fn iteration(&self, s: &mut KernelStream, pass: Pass) {
        let t = self.scalar;
        s.line(format!("{LOCAL_BARRIER};"));
        s.line(format!(
            "{LOCAL_PTR} {t}* ldsA = lA + fy*{} + fx;",
            self.llda()
        ));
        s.line(format!(
            "{LOCAL_PTR} {t}* ldsB = lB + fy*{} + fx;",
            self.lldb()
        ));
        self.copy_a(s, pass);
        self.copy_b(s, pass);
        s.line(format!("{LOCAL_BARRIER};"));
        self.compute(s, pass);
    }

    fn copy_a(&self, s: &mut KernelStream, pass: Pass) {
        let p = self.p;
        let llda = self.llda();
        match p.a_trans() {
            Transpose::N => {
                for k in (0..p.kl()).step_by(p.lf1() as usize) {
                    for m in (0..p.ml()).step_by(self.lane_step() as usize) {
                        let i = m / self.lane_step();
                        let dst = k * llda + m;
                        let src = format!("Ai[{}]", i);
                        self.copy_lanes(s, pass, "ldsA", dst, &src, &times(k, "lda"), "Astride1", |_| {
                            format!("condy{}", k)
                        });
                    }
                }
            }
            Transpose::T => {
                for k in (0..p.kl()).step_by(self.lane_step() as usize) {
                    for m in (0..p.ml()).step_by(p.lf1() as usize) {
                        let i = m / p.lf1();
                        let dst = m * llda + k;
                        let src = format!("Ai[{}]", i);
                        self.copy_run(s, pass, "ldsA", dst, &src, k, "Astride1");
                    }
                }
            }
        }
    }

    fn copy_b(&self, s: &mut KernelStream, pass: Pass) {
        let p = self.p;
        let lldb = self.lldb();
        match p.b_trans() {
            Transpose::T => {
                for k in (0..p.kl()).step_by(p.lf1() as usize) {
                    for n in (0..p.nl()).step_by(self.lane_step() as usize) {
                        let i = n / self.lane_step();
                        let dst = k * lldb + n;
                        let src = format!("Bi[{}]", i);
                        self.copy_lanes(s, pass, "ldsB", dst, &src, &times(k, "ldb"), "Bstride1", |_| {
                            format!("condy{}", k)
                        });
                    }
                }
            }
            Transpose::N => {
                for k in (0..p.kl()).step_by(self.lane_step() as usize) {
                    for n in (0..p.nl()).step_by(p.lf1() as usize) {
                        let i = n / p.lf1();
                        let dst = n * lldb + k;
                        let src = format!("Bi[{}]", i);
                        self.copy_run(s, pass, "ldsB", dst, &src, k, "Bstride1");
                    }
                }
            }
        }
    }

    /// Copy `vw` elements that are contiguous along the operand's row axis
    /// (A-N, B-T). `k_offset` selects the column; all lanes share one
    /// predicate in the tail.
    #[allow(clippy::too_many_arguments)]
    fn copy_lanes(
        &self,
        s: &mut KernelStream,
        pass: Pass,
        lds: &str,
        dst: u32,
        src: &str,
        k_offset: &str,
        stride1: &str,
        cond: impl Fn(u32) -> String,
    ) {
        let vw = self.p.vw();
        match pass {
            Pass::Main if vw > 1 => {
                let load = keywords::vload(vw, &at(src, k_offset));
                s.line(format!(
                    "{};",
                    keywords::vstore(vw, &load, &at(lds, &dst.to_string()))
                ));
            }
            Pass::Main => {
                s.line(format!("{}[{}] = {}[{}];", lds, dst, src, k_offset));
            }
            Pass::Tail => {
                for lane in 0..vw {
                    let index = sum(&[k_offset.to_string(), times(lane, stride1)]);
                    s.line(format!(
                        "{}[{}] = {} ? {}[{}] : 0;",
                        lds,
                        dst + lane,
                        cond(lane),
                        src,
                        index
                    ));
                }
            }
        }
    }

    /// Copy `vw` elements that run along K (A-T, B-N); each lane has its own
    /// predicate in the tail.
    #[allow(clippy::too_many_arguments)]
    fn copy_run(
        &self,
        s: &mut KernelStream,
        pass: Pass,
        lds: &str,
        dst: u32,
        src: &str,
        k: u32,
        stride1: &str,
    ) {
        let vw = self.p.vw();
        match pass {
            Pass::Main if vw > 1 => {
                let load = keywords::vload(vw, &at(src, &times(k, stride1)));
                s.line(format!(
                    "{};",
                    keywords::vstore(vw, &load, &at(lds, &dst.to_string()))
                ));
            }
            Pass::Main => {
                s.line(format!("{}[{}] = {}[{}];", lds, dst, src, times(k, stride1)));
            }
            Pass::Tail => {
                for lane in 0..vw {
                    s.line(format!(
                        "{}[{}] = condx{} ? {}[{}] : 0;",
                        lds,
                        dst + lane,
                        k + lane,
                        src,
                        times(k + lane, stride1)
                    ));
                }
            }
        }
    }

    /// Per-thread predicates of the tail pass, one per staged K offset.
    fn predicates(&self, s: &mut KernelStream) {
        let p = self.p;
        let rows = p.a_trans() == Transpose::N || p.b_trans() == Transpose::T;
        let cols = p.a_trans() == Transpose::T || p.b_trans() == Transpose::N;
        if rows {
            s.line("int Ky = Kr - fy;");
            for k in (0..p.kl()).step_by(p.lf1() as usize) {
                s.line(format!("int condy{k} = {k} < Ky;"));
            }
        }
        if cols {
            s.line("int Kx = Kr - fx;");
            for k in (0..p.kl()).step_by(self.lane_step() as usize) {
                for lane in 0..p.vw() {
                    let q = k + lane;
                    s.line(format!("int condx{q} = {q} < Kx;"));
                }
            }
        }
    }

    fn compute(&self, s: &mut KernelStream, pass: Pass) {
        let p = self.p;
        let vw = p.vw();
        let (bound, step) = match pass {
            Pass::Main => (p.kl().to_string(), p.ks()),
            Pass::Tail => ("Kr".to_string(), 1),
        };

        s.line(format!(
            "ldsA = lA + {};",
            self.register_base(p.a_trans(), "lid0", self.llda())
        ));
        s.line(format!(
            "ldsB = lB + {};",
            self.register_base(flip(p.b_trans()), "lid1", self.lldb())
        ));
        s.open(format!("for(int k = 0; k < {bound}; k += {step})"));

        s.line("#pragma unroll");
        s.open(format!("for(int kk = 0; kk < {step}; ++kk)"));
        self.fill_registers(s, "rA", "ldsA", "mm", p.ms() / vw, p.ls0(), self.llda(), p.a_trans());
        self.fill_registers(s, "rB", "ldsB", "nn", p.ns() / vw, p.ls1(), self.lldb(), flip(p.b_trans()));
        s.close();

        s.line("#pragma unroll");
        s.open(format!("for(int kk = 0; kk < {step}; ++kk)"));
        for mm in 0..p.ms() {
            for nn in 0..p.ns() {
                let a = keywords::lane(&format!("rA[kk][{}]", mm / vw), mm % vw, vw);
                let b = keywords::lane(&format!("rB[kk][{}]", nn / vw), nn % vw, vw);
                let c = format!("rC[{mm}][{nn}]");
                s.line(format!("{c} = {};", keywords::mad(&a, &b, &c)));
            }
        }
        s.close();
        s.close();
    }

    /// Offset of a thread's first register row inside a staging buffer.
    /// `N` layouts keep the thread's rows contiguous; `T` layouts keep K
    /// contiguous with one padded run per row.
    fn register_base(&self, layout: Transpose, lid: &str, ld: u32) -> String {
        let vw = self.p.vw();
        match layout {
            Transpose::N => times(vw, lid),
            Transpose::T => times(vw * ld, lid),
        }
    }

    /// Load one `kS` slab of register operands. `layout` is `N` when the
    /// staged buffer is `[k][row]` and `T` when it is `[row][k]` (padded).
    #[allow(clippy::too_many_arguments)]
    fn fill_registers(
        &self,
        s: &mut KernelStream,
        reg: &str,
        lds: &str,
        idx: &str,
        count: u32,
        ls: u32,
        ld: u32,
        layout: Transpose,
    ) {
        let vw = self.p.vw();
        s.line("#pragma unroll");
        s.open(format!("for(int {idx} = 0; {idx} < {count}; ++{idx})"));
        match layout {
            Transpose::N => {
                let addr = format!("(k + kk)*{} + {}*{}", ld, idx, ls * vw);
                if vw == 1 {
                    s.line(format!("{reg}[kk][{idx}] = {lds}[{addr}];"));
                } else {
                    s.line(format!(
                        "{reg}[kk][{idx}] = {};",
                        keywords::vload(vw, &format!("{} + {}", lds, addr))
                    ));
                }
            }
            Transpose::T => {
                for lane in 0..vw {
                    let row = if lane == 0 {
                        format!("{}*{}", idx, vw * ls)
                    } else {
                        format!("({}*{} + {})", idx, vw * ls, lane)
                    };
                    let dst = keywords::lane(&format!("{reg}[kk][{idx}]"), lane, vw);
                    s.line(format!("{dst} = {lds}[k + kk + {row}*{ld}];"));
                }
            }
        }
        s.close();
    }

    fn advance(&self, s: &mut KernelStream) {
        let p = self.p;
        let kl = p.kl();
        let a_step = match p.a_trans() {
            Transpose::N => times(kl, "lda"),
            Transpose::T => times(kl, "Astride1"),
        };
        let b_step = match p.b_trans() {
            Transpose::T => times(kl, "ldb"),
            Transpose::N => times(kl, "Bstride1"),
        };
        s.line(format!(
            "for(int i = 0; i < {}; ++i) Ai[i] += {};",
            p.a_fetch_count(),
            a_step
        ));
        s.line(format!(
            "for(int i = 0; i < {}; ++i) Bi[i] += {};",
            p.b_fetch_count(),
            b_step
        ));
    }

    fn write_back(&self, s: &mut KernelStream) {
        let p = self.p;
        let vw = p.vw();
        s.blank().comment("write back");
        s.line(format!(
            "C += (row0 + {})*Cstride1 + (col0 + {})*ldc;",
            times(vw, "lid0"),
            times(vw, "lid1")
        ));
        if p.depth() > 1 {
            s.line("C += gidz*ldc*N;");
        }
        s.line(format!("int Mc = (int)M - row0 - {};", times(vw, "lid0")));
        s.line(format!("int Nc = (int)N - col0 - {};", times(vw, "lid1")));
        for nn in 0..p.ns() {
            let cj = (nn / vw) * (p.ls1() * vw) + nn % vw;
            s.line(format!("if({cj} >= Nc) return;"));
            for mm in 0..p.ms() {
                s.line(format!("rC[{mm}][{nn}] *= alpha;"));
            }
            for mm in 0..p.ms() {
                let ci = (mm / vw) * (p.ls0() * vw) + mm % vw;
                let index = sum(&[times(ci, "Cstride1"), times(cj, "ldc")]);
                if p.depth() > 1 {
                    s.line(format!("if({ci} < Mc) C[{index}] = rC[{mm}][{nn}];"));
                } else {
                    s.line(format!(
                        "if({ci} < Mc) C[{index}] = rC[{mm}][{nn}] + ((beta != 0) ? beta*C[{index}] : 0);"
                    ));
                }
            }
        }
    }
}

/// B is staged `[k][col]` when transposed, mirroring A's `[k][row]` when not.
fn flip(t: Transpose) -> Transpose {
    match t {
        Transpose::N => Transpose::T,
        Transpose::T => Transpose::N,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::keywords::{placeholders, stem};
    use crate::params::{GemmVariant, Tiling};
    use crate::validate::validate;

    const F32: NumericType = NumericType::Float32;

    fn scalar_tiling() -> Tiling {
        Tiling {
            vector_width: 1,
            local_size: [4, 4],
            kl: 8,
            depth: 1,
            register_tile: [2, 2, 2],
            local_fetch: [4, 4],
            ..Tiling::default()
        }
    }

    fn vector_tiling() -> Tiling {
        Tiling {
            vector_width: 2,
            local_fetch: [2, 8],
            ..scalar_tiling()
        }
    }

    fn gen(variant: GemmVariant, tiling: Tiling) -> String {
        let params = GemmParams::new(variant, tiling);
        assert_eq!(validate(&params), Ok(()));
        generate(&params, F32, "_t0")
    }

    #[test]
    fn test_signature() {
        let src = gen(GemmVariant::NN, scalar_tiling());
        assert!(src.starts_with("$KERNEL void gemm_t0($SIZE_T M, $SIZE_T N, $SIZE_T K,\n"));
        assert!(src.contains("$GLOBAL float* C, $SIZE_T ldc, $SIZE_T offc, $SIZE_T Cstride1,"));
        assert!(src.contains("$GLOBAL float* A, $SIZE_T lda, $SIZE_T offa, $SIZE_T Astride1,"));
        assert!(src.contains("$GLOBAL float* B, $SIZE_T ldb, $SIZE_T offb, $SIZE_T Bstride1,"));
        assert!(src.contains("    float beta)\n{"));
    }

    #[test]
    fn test_nn_scalar_fragments() {
        let src = gen(GemmVariant::NN, scalar_tiling());
        // staging: A [k][m] with ld mL = 8, B [n][k] with ld kL+1 = 9
        assert!(src.contains("$LOCAL float lA[64];"));
        assert!(src.contains("$LOCAL float lB[72];"));
        assert!(src.contains("$LOCAL_PTR float* ldsA = lA + fy*8 + fx;"));
        assert!(src.contains("$LOCAL_PTR float* ldsB = lB + fy*9 + fx;"));
        // A-N copy
        assert!(src.contains("ldsA[0] = Ai[0][0];"));
        assert!(src.contains("ldsA[4] = Ai[1][0];"));
        assert!(src.contains("ldsA[32] = Ai[0][4*lda];"));
        assert!(src.contains("ldsA[32] = condy4 ? Ai[0][4*lda] : 0;"));
        // B-N copy
        assert!(src.contains("ldsB[40] = Bi[1][4*Bstride1];"));
        assert!(src.contains("ldsB[40] = condx4 ? Bi[1][4*Bstride1] : 0;"));
        // clamped pointers
        assert!(src.contains("Ai[1] = A + ((fx + 4 < Ma) ? (fx + 4)*Astride1 : 0);"));
        assert!(src.contains("Bi[1] = B + ((fy + 4 < Nb) ? (fy + 4)*ldb : 0);"));
        // register reads
        assert!(src.contains("rA[kk][mm] = ldsA[(k + kk)*8 + mm*4];"));
        assert!(src.contains("rB[kk][nn] = ldsB[k + kk + nn*4*9];"));
        assert!(src.contains("rC[1][1] = $MAD(rA[kk][1], rB[kk][1], rC[1][1]);"));
        // pointer advance
        assert!(src.contains("Ai[i] += 8*lda;"));
        assert!(src.contains("Bi[i] += 8*Bstride1;"));
    }

    #[test]
    fn test_transposed_scalar_fragments() {
        let src = gen(GemmVariant::TT, scalar_tiling());
        // A-T staged [m][k] padded, B-T staged [k][n]
        assert!(src.contains("$LOCAL float lA[72];"));
        assert!(src.contains("$LOCAL float lB[64];"));
        assert!(src.contains("A += row0*lda + fx*Astride1;"));
        assert!(src.contains("B += col0*Bstride1 + fy*ldb;"));
        assert!(src.contains("ldsA[36] = Ai[1][0];"));
        assert!(src.contains("ldsA[40] = condx4 ? Ai[1][4*Astride1] : 0;"));
        assert!(src.contains("ldsB[32] = condy4 ? Bi[0][4*ldb] : 0;"));
        assert!(src.contains("rA[kk][mm] = ldsA[k + kk + mm*4*9];"));
        assert!(src.contains("ldsA = lA + 9*lid0;"));
        assert!(src.contains("ldsB = lB + lid1;"));
        assert!(src.contains("Ai[i] += 8*Astride1;"));
        assert!(src.contains("Bi[i] += 8*ldb;"));
    }

    #[test]
    fn test_vector_fragments() {
        let src = gen(GemmVariant::NT, vector_tiling());
        assert!(src.contains("float2 rA[2][1];"));
        assert!(src.contains("int fx = (idt % 2)*2;"));
        assert!(src.contains("$VSTORE2($VLOAD2(Ai[0]), ldsA);"));
        assert!(src.contains("$VSTORE2($VLOAD2(Bi[1]), ldsB + 4);"));
        // tail splits vectors into predicated scalar loads
        assert!(src.contains("ldsA[1] = condy0 ? Ai[0][Astride1] : 0;"));
        assert!(src.contains("rA[kk][mm] = $VLOAD2(ldsA + (k + kk)*8 + mm*8);"));
        assert!(src.contains("rC[1][0] = $MAD($LANE(rA[kk][0], 1), $LANE(rB[kk][0], 0), rC[1][0]);"));

        let src = gen(GemmVariant::TN, vector_tiling());
        assert!(src.contains("$LANE(rA[kk][mm], 1) = ldsA[k + kk + (mm*8 + 1)*9];"));
        assert!(src.contains("int condx1 = 1 < Kx;"));
    }

    #[test]
    fn test_two_barriers_per_iteration() {
        for variant in GemmVariant::ALL {
            let src = gen(variant, scalar_tiling());
            assert_eq!(src.matches("$LOCAL_BARRIER;").count(), 4);
        }
    }

    #[test]
    fn test_write_back_beta_guard() {
        let src = gen(GemmVariant::NN, scalar_tiling());
        assert!(src.contains("if(4 >= Nc) return;"));
        assert!(src.contains(
            "if(4 < Mc) C[4*Cstride1 + 4*ldc] = rC[1][1] + ((beta != 0) ? beta*C[4*Cstride1 + 4*ldc] : 0);"
        ));
        assert!(!src.contains("gidz"));
        assert!(!src.contains("reduce_t0"));
    }

    #[test]
    fn test_split_depth() {
        let mut tiling = scalar_tiling();
        tiling.depth = 3;
        let src = gen(GemmVariant::NN, tiling);
        let (main, reduction) = src.split_once("$KERNEL void reduce_t0").unwrap();
        assert!(main.contains("int gidz = $GROUP_IDX_2;"));
        assert!(main.contains("int div = (Kr + 2)/3;"));
        assert!(main.contains("Kr = max(min(Kr - offz, div), 0);"));
        assert!(main.contains("A += offz*lda;"));
        assert!(main.contains("B += offz*Bstride1;"));
        assert!(main.contains("C += gidz*ldc*N;"));
        assert!(main.contains("if(4 < Mc) C[4*Cstride1 + 4*ldc] = rC[1][1];"));
        assert!(!main.contains("beta*"));
        assert!(reduction.contains("beta"));
    }

    #[test]
    fn test_only_known_placeholders() {
        for variant in GemmVariant::ALL {
            for tiling in [scalar_tiling(), vector_tiling()] {
                let mut tiling = tiling;
                tiling.depth = 2;
                let src = gen(variant, tiling);
                for token in placeholders(&src) {
                    assert!(stem(&token).is_some(), "unknown placeholder {}", token);
                }
                assert!(!src.contains("__kernel"));
                assert!(!src.contains("__global"));
                assert!(!src.contains("__syncthreads"));
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let params = GemmParams::tn(vector_tiling());
        assert_eq!(generate(&params, F32, "_x"), generate(&params, F32, "_x"));
        let f64_src = generate(&params, NumericType::Float64, "_x");
        assert!(f64_src.contains("double2 rA"));
        assert!(f64_src.contains("double alpha,"));
    }

    /// Per operand of `variant`: fetch array, staging pointer, whether the
    /// tile is staged along rows, and the pitch one K step advances by.
    fn sides(variant: GemmVariant) -> [(&'static str, &'static str, bool, &'static str); 2] {
        let a = match variant.a_trans() {
            Transpose::N => ("Ai", "ldsA", true, "lda"),
            Transpose::T => ("Ai", "ldsA", false, "Astride1"),
        };
        let b = match variant.b_trans() {
            Transpose::T => ("Bi", "ldsB", true, "ldb"),
            Transpose::N => ("Bi", "ldsB", false, "Bstride1"),
        };
        [a, b]
    }

    #[test]
    fn test_tail_predicates_and_decrement() {
        for variant in GemmVariant::ALL {
            for tiling in [scalar_tiling(), vector_tiling()] {
                let (vw, kl, lf0, lf1) = (tiling.vector_width, tiling.kl, tiling.local_fetch[0], tiling.local_fetch[1]);
                let src = gen(variant, tiling);
                let context = format!("{} vw{}", variant, vw);
                assert_eq!(src.matches("Kr -= 8;").count(), 1, "{}", context);
                let (main, tail) = src.split_once("Kr -= 8;").unwrap();
                assert!(!main.contains("cond"), "{}", context);

                let rows = sides(variant).iter().any(|side| side.2);
                let cols = sides(variant).iter().any(|side| !side.2);
                assert_eq!(tail.contains("int Ky = Kr - fy;"), rows, "{}", context);
                assert_eq!(tail.contains("int Kx = Kr - fx;"), cols, "{}", context);
                for k in (0..kl).step_by(lf1 as usize) {
                    let line = format!("int condy{k} = {k} < Ky;");
                    assert_eq!(tail.contains(&line), rows, "{}: {}", context, line);
                }
                for k in (0..kl).step_by((lf0 * vw) as usize) {
                    for lane in 0..vw {
                        let q = k + lane;
                        let line = format!("int condx{q} = {q} < Kx;");
                        assert_eq!(tail.contains(&line), cols, "{}: {}", context, line);
                    }
                }
                assert!(!tail.contains("<= K"), "{}", context);
            }
        }
    }

    #[test]
    fn test_main_and_tail_copies() {
        for variant in GemmVariant::ALL {
            for tiling in [scalar_tiling(), vector_tiling()] {
                let vw = tiling.vector_width;
                let src = gen(variant, tiling);
                let (main, tail) = src.split_once("Kr -= 8;").unwrap();
                for (fetch, lds, rows, pitch) in sides(variant) {
                    let context = format!("{} vw{} {}", variant, vw, lds);
                    let stride1 = if fetch == "Ai" { "Astride1" } else { "Bstride1" };
                    if vw == 1 {
                        assert!(main.contains(&format!("{lds}[0] = {fetch}[0][0];")), "{}", context);
                    } else {
                        assert!(main.contains(&format!("$VSTORE2($VLOAD2({fetch}[0]), {lds});")), "{}", context);
                    }
                    // the tail splits vectors into one predicated load per lane
                    let cond = if rows { "condy0" } else { "condx0" };
                    assert!(tail.contains(&format!("{lds}[0] = {cond} ? {fetch}[0][0] : 0;")), "{}", context);
                    if vw == 2 {
                        let cond = if rows { "condy0" } else { "condx1" };
                        assert!(
                            tail.contains(&format!("{lds}[1] = {cond} ? {fetch}[0][{stride1}] : 0;")),
                            "{}",
                            context
                        );
                    }
                    assert!(!tail.contains("$VSTORE"), "{}", context);
                    assert!(src.contains(&format!("; ++i) {fetch}[i] += 8*{pitch};")), "{}", context);
                }
            }
        }
    }

    #[test]
    fn test_write_back_guards() {
        for variant in GemmVariant::ALL {
            for tiling in [scalar_tiling(), vector_tiling()] {
                let vw = tiling.vector_width;
                let src = gen(variant, tiling);
                let (lid0, lid1) = if vw == 1 { ("lid0", "lid1") } else { ("2*lid0", "2*lid1") };
                assert!(src.contains(&format!("C += (row0 + {lid0})*Cstride1 + (col0 + {lid1})*ldc;")));
                assert!(src.contains(&format!("int Mc = (int)M - row0 - {lid0};")));
                assert!(src.contains(&format!("int Nc = (int)N - col0 - {lid1};")));
                assert!(src.contains("if(0 >= Nc) return;"));
                assert!(src.contains("if(0 < Mc) C[0] = rC[0][0] + ((beta != 0) ? beta*C[0] : 0);"));
                // second register column sits one thread row (or lane) over
                let cj = if vw == 1 { 4 } else { 1 };
                assert!(src.contains(&format!("if({cj} >= Nc) return;")), "{} vw{}", variant, vw);
            }
        }
    }

    #[test]
    fn test_split_depth_offsets_per_variant() {
        let expected = [
            (GemmVariant::NN, "A += offz*lda;", "B += offz*Bstride1;"),
            (GemmVariant::TN, "A += offz*Astride1;", "B += offz*Bstride1;"),
            (GemmVariant::NT, "A += offz*lda;", "B += offz*ldb;"),
            (GemmVariant::TT, "A += offz*Astride1;", "B += offz*ldb;"),
        ];
        for (variant, a, b) in expected {
            let src = gen(variant, Tiling { depth: 2, ..scalar_tiling() });
            assert!(src.contains(a), "{}", variant);
            assert!(src.contains(b), "{}", variant);
            assert!(src.contains("int offz = div*gidz;"));
            let single = gen(variant, scalar_tiling());
            assert!(!single.contains("offz"), "{}", variant);
        }
    }
}
