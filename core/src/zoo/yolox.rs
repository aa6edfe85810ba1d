//! YOLOX: CSPDarknet backbone, PAFPN neck and decoupled head.
use ndarray::Array3;

use super::Exp;
use crate::internal::*;
use crate::nn::*;
use crate::ops::array::{Concat, Reshape, Slice, Transpose};
use crate::ops::binary::{Add, Mul};
use crate::ops::element_wise as ew;
use crate::trace::Tracer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Act {
    SiLU,
    ReLU,
    LReLU,
}

impl Act {
    pub fn parse(name: &str) -> ExportResult<Act> {
        match name {
            "silu" => Ok(Act::SiLU),
            "relu" => Ok(Act::ReLU),
            "lrelu" => Ok(Act::LReLU),
            _ => bail!(ExportError::Configuration(format!("unsupported activation {name}"))),
        }
    }

    fn layer(self) -> Box<dyn Layer> {
        match self {
            Act::SiLU => SiLU.into(),
            Act::ReLU => ReLU.into(),
            Act::LReLU => LeakyReLU { negative_slope: 0.1 }.into(),
        }
    }
}

/// Builds blocks with consecutive weight seeds.
#[derive(Debug, Clone)]
struct Builder {
    seed: u64,
    act: Act,
    depthwise: bool,
}

impl Builder {
    fn conv2d(&mut self, cin: usize, cout: usize, k: usize, stride: usize, bias: bool) -> Conv2d {
        self.seed += 1;
        Conv2d::new(cin, cout, k, stride, 1, bias, self.seed)
    }

    fn base_conv(&mut self, cin: usize, cout: usize, k: usize, stride: usize) -> Box<dyn Layer> {
        self.grouped_conv(cin, cout, k, stride, 1)
    }

    fn grouped_conv(
        &mut self,
        cin: usize,
        cout: usize,
        k: usize,
        stride: usize,
        groups: usize,
    ) -> Box<dyn Layer> {
        self.seed += 1;
        BaseConv {
            conv: Conv2d::new(cin, cout, k, stride, groups, false, self.seed).into(),
            bn: BatchNorm2d::new(cout).into(),
            act: self.act.layer(),
        }
        .into()
    }

    /// Depthwise separable when the network is depthwise, plain otherwise.
    fn conv(&mut self, cin: usize, cout: usize, k: usize, stride: usize) -> Box<dyn Layer> {
        if self.depthwise {
            DWConv {
                dconv: self.grouped_conv(cin, cin, k, stride, cin),
                pconv: self.base_conv(cin, cout, 1, 1),
            }
            .into()
        } else {
            self.base_conv(cin, cout, k, stride)
        }
    }

    fn bottleneck(&mut self, cin: usize, cout: usize, shortcut: bool) -> Box<dyn Layer> {
        Bottleneck {
            conv1: self.base_conv(cin, cout, 1, 1),
            conv2: self.conv(cout, cout, 3, 1),
            use_add: shortcut && cin == cout,
        }
        .into()
    }

    fn csp_layer(&mut self, cin: usize, cout: usize, n: usize, shortcut: bool) -> Box<dyn Layer> {
        let hidden = cout / 2;
        let conv1 = self.base_conv(cin, hidden, 1, 1);
        let conv2 = self.base_conv(cin, hidden, 1, 1);
        let conv3 = self.base_conv(2 * hidden, cout, 1, 1);
        let m = (0..n).map(|_| self.bottleneck(hidden, hidden, shortcut)).collect();
        CspLayer { conv1, conv2, conv3, m: Sequential::new(m).into() }.into()
    }

    fn spp_bottleneck(&mut self, cin: usize, cout: usize) -> Box<dyn Layer> {
        let hidden = cin / 2;
        let pools: [Box<dyn Layer>; 3] = [5, 9, 13].map(|k| MaxPool2d::new(k, 1, k / 2).into());
        SppBottleneck {
            conv1: self.base_conv(cin, hidden, 1, 1),
            conv2: self.base_conv(hidden * (pools.len() + 1), cout, 1, 1),
            m: ModuleList::new(pools.into()).into(),
        }
        .into()
    }

    /// Two stacked 3x3 convs, one head branch.
    fn branch(&mut self, channels: usize) -> Box<dyn Layer> {
        let convs = vec![self.conv(channels, channels, 3, 1), self.conv(channels, channels, 3, 1)];
        Sequential::new(convs).into()
    }

    /// 1x1 prediction conv, biased towards a prior probability when given.
    fn pred(&mut self, cin: usize, cout: usize, prior: Option<f32>) -> Box<dyn Layer> {
        let mut conv = self.conv2d(cin, cout, 1, 1, true);
        if let Some(p) = prior {
            let bias = -((1.0 - p) / p).ln();
            conv.bias = Some(Tensor::from(ndarray::ArrayD::from_elem(vec![cout], bias)));
        }
        conv.into()
    }
}

fn concat(t: &mut Tracer, axis: i64, inputs: &[OutletId]) -> ExportResult<OutletId> {
    t.op1(Concat::new(axis), inputs)
}

/// Strided slice along `axes`, with constant bounds.
fn slice(
    t: &mut Tracer,
    x: OutletId,
    starts: &[i64],
    ends: &[i64],
    axes: &[i64],
    steps: &[i64],
) -> ExportResult<OutletId> {
    let starts = t.konst(Tensor::from_i64s(starts))?;
    let ends = t.konst(Tensor::from_i64s(ends))?;
    let axes = t.konst(Tensor::from_i64s(axes))?;
    let steps = t.konst(Tensor::from_i64s(steps))?;
    t.op1(Slice, &[x, starts, ends, axes, steps])
}

/// Conv, batch norm, activation.
#[derive(Debug)]
pub struct BaseConv {
    pub conv: Box<dyn Layer>,
    pub bn: Box<dyn Layer>,
    pub act: Box<dyn Layer>,
}

impl Layer for BaseConv {
    fn name(&self) -> &'static str {
        "BaseConv"
    }

    fn forward(&self, t: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        let x = t.call1("conv", &*self.conv, inputs[0])?;
        let x = t.call1("bn", &*self.bn, x)?;
        t.call("act", &*self.act, &[x])
    }

    layer_children!(conv, bn, act);
}

/// Depthwise conv followed by a pointwise conv.
#[derive(Debug)]
pub struct DWConv {
    pub dconv: Box<dyn Layer>,
    pub pconv: Box<dyn Layer>,
}

impl Layer for DWConv {
    fn name(&self) -> &'static str {
        "DWConv"
    }

    fn forward(&self, t: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        let x = t.call1("dconv", &*self.dconv, inputs[0])?;
        t.call("pconv", &*self.pconv, &[x])
    }

    layer_children!(dconv, pconv);
}

#[derive(Debug)]
pub struct Bottleneck {
    pub conv1: Box<dyn Layer>,
    pub conv2: Box<dyn Layer>,
    pub use_add: bool,
}

impl Layer for Bottleneck {
    fn name(&self) -> &'static str {
        "Bottleneck"
    }

    fn forward(&self, t: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        let y = t.call1("conv1", &*self.conv1, inputs[0])?;
        let y = t.call1("conv2", &*self.conv2, y)?;
        if self.use_add { t.op(Add, &[y, inputs[0]]) } else { Ok(tvec!(y)) }
    }

    layer_children!(conv1, conv2);
}

/// Spatial pyramid pooling: the input and three max pools of it, stacked.
#[derive(Debug)]
pub struct SppBottleneck {
    pub conv1: Box<dyn Layer>,
    pub m: Box<dyn Layer>,
    pub conv2: Box<dyn Layer>,
}

impl Layer for SppBottleneck {
    fn name(&self) -> &'static str {
        "SPPBottleneck"
    }

    fn forward(&self, t: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        let x = t.call1("conv1", &*self.conv1, inputs[0])?;
        let mut branches = tvec!(x);
        for ix in 0..self.m.children().len() {
            branches.push(t.call_item("m", &*self.m, ix, &[x])?[0]);
        }
        let x = concat(t, 1, &branches)?;
        t.call("conv2", &*self.conv2, &[x])
    }

    layer_children!(conv1, m, conv2);
}

/// Cross stage partial block: half the channels go through the bottlenecks.
#[derive(Debug)]
pub struct CspLayer {
    pub conv1: Box<dyn Layer>,
    pub conv2: Box<dyn Layer>,
    pub conv3: Box<dyn Layer>,
    pub m: Box<dyn Layer>,
}

impl Layer for CspLayer {
    fn name(&self) -> &'static str {
        "CSPLayer"
    }

    fn forward(&self, t: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        let x1 = t.call1("conv1", &*self.conv1, inputs[0])?;
        let x2 = t.call1("conv2", &*self.conv2, inputs[0])?;
        let x1 = t.call1("m", &*self.m, x1)?;
        let x = concat(t, 1, &[x1, x2])?;
        t.call("conv3", &*self.conv3, &[x])
    }

    layer_children!(conv1, conv2, conv3, m);
}

/// Space to depth: each 2x2 pixel block becomes four channels.
#[derive(Debug)]
pub struct Focus {
    pub conv: Box<dyn Layer>,
}

impl Layer for Focus {
    fn name(&self) -> &'static str {
        "Focus"
    }

    fn forward(&self, t: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        let x = inputs[0];
        let end = i64::MAX;
        let mut patches = tvec!();
        // top left, bottom left, top right, bottom right
        for (y0, x0) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            patches.push(slice(t, x, &[y0, x0], &[end, end], &[2, 3], &[2, 2])?);
        }
        let x = concat(t, 1, &patches)?;
        t.call("conv", &*self.conv, &[x])
    }

    layer_children!(conv);
}

/// Backbone, with outputs at strides 8, 16 and 32.
#[derive(Debug)]
pub struct CspDarknet {
    pub stem: Box<dyn Layer>,
    pub dark2: Box<dyn Layer>,
    pub dark3: Box<dyn Layer>,
    pub dark4: Box<dyn Layer>,
    pub dark5: Box<dyn Layer>,
}

impl CspDarknet {
    fn new(b: &mut Builder, depth: f32, width: f32) -> CspDarknet {
        let bc = (width * 64.0) as usize;
        let bd = ((depth * 3.0).round() as usize).max(1);
        let stem = Focus { conv: b.base_conv(3 * 4, bc, 3, 1) }.into();
        let dark2 =
            Sequential::new(vec![b.conv(bc, bc * 2, 3, 2), b.csp_layer(bc * 2, bc * 2, bd, true)]);
        let dark3 = Sequential::new(vec![
            b.conv(bc * 2, bc * 4, 3, 2),
            b.csp_layer(bc * 4, bc * 4, bd * 3, true),
        ]);
        let dark4 = Sequential::new(vec![
            b.conv(bc * 4, bc * 8, 3, 2),
            b.csp_layer(bc * 8, bc * 8, bd * 3, true),
        ]);
        let dark5 = Sequential::new(vec![
            b.conv(bc * 8, bc * 16, 3, 2),
            b.spp_bottleneck(bc * 16, bc * 16),
            b.csp_layer(bc * 16, bc * 16, bd, false),
        ]);
        CspDarknet {
            stem,
            dark2: dark2.into(),
            dark3: dark3.into(),
            dark4: dark4.into(),
            dark5: dark5.into(),
        }
    }
}

impl Layer for CspDarknet {
    fn name(&self) -> &'static str {
        "CSPDarknet"
    }

    fn forward(&self, t: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        let x = t.call1("stem", &*self.stem, inputs[0])?;
        let x = t.call1("dark2", &*self.dark2, x)?;
        let dark3 = t.call1("dark3", &*self.dark3, x)?;
        let dark4 = t.call1("dark4", &*self.dark4, dark3)?;
        let dark5 = t.call1("dark5", &*self.dark5, dark4)?;
        Ok(tvec!(dark3, dark4, dark5))
    }

    layer_children!(stem, dark2, dark3, dark4, dark5);
}

/// Feature pyramid, top-down then bottom-up.
#[derive(Debug)]
pub struct YoloPafpn {
    pub backbone: Box<dyn Layer>,
    pub upsample: Box<dyn Layer>,
    pub lateral_conv0: Box<dyn Layer>,
    pub c3_p4: Box<dyn Layer>,
    pub reduce_conv1: Box<dyn Layer>,
    pub c3_p3: Box<dyn Layer>,
    pub bu_conv2: Box<dyn Layer>,
    pub c3_n3: Box<dyn Layer>,
    pub bu_conv1: Box<dyn Layer>,
    pub c3_n4: Box<dyn Layer>,
}

impl YoloPafpn {
    fn new(b: &mut Builder, depth: f32, width: f32) -> YoloPafpn {
        let [c0, c1, c2] = [256, 512, 1024].map(|c| (c as f32 * width) as usize);
        let n = (depth * 3.0).round() as usize;
        YoloPafpn {
            backbone: CspDarknet::new(b, depth, width).into(),
            upsample: Upsample::new(2).into(),
            lateral_conv0: b.base_conv(c2, c1, 1, 1),
            c3_p4: b.csp_layer(2 * c1, c1, n, false),
            reduce_conv1: b.base_conv(c1, c0, 1, 1),
            c3_p3: b.csp_layer(2 * c0, c0, n, false),
            bu_conv2: b.conv(c0, c0, 3, 2),
            c3_n3: b.csp_layer(2 * c0, c1, n, false),
            bu_conv1: b.conv(c1, c1, 3, 2),
            c3_n4: b.csp_layer(2 * c1, c2, n, false),
        }
    }
}

impl Layer for YoloPafpn {
    fn name(&self) -> &'static str {
        "YOLOPAFPN"
    }

    fn forward(&self, t: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        let features = t.call("backbone", &*self.backbone, inputs)?;
        let [x2, x1, x0] = [features[0], features[1], features[2]];

        let fpn_out0 = t.call1("lateral_conv0", &*self.lateral_conv0, x0)?;
        let f_out0 = t.call1("upsample", &*self.upsample, fpn_out0)?;
        let f_out0 = concat(t, 1, &[f_out0, x1])?;
        let f_out0 = t.call1("C3_p4", &*self.c3_p4, f_out0)?;

        let fpn_out1 = t.call1("reduce_conv1", &*self.reduce_conv1, f_out0)?;
        let f_out1 = t.call1("upsample", &*self.upsample, fpn_out1)?;
        let f_out1 = concat(t, 1, &[f_out1, x2])?;
        let pan_out2 = t.call1("C3_p3", &*self.c3_p3, f_out1)?;

        let p_out1 = t.call1("bu_conv2", &*self.bu_conv2, pan_out2)?;
        let p_out1 = concat(t, 1, &[p_out1, fpn_out1])?;
        let pan_out1 = t.call1("C3_n3", &*self.c3_n3, p_out1)?;

        let p_out0 = t.call1("bu_conv1", &*self.bu_conv1, pan_out1)?;
        let p_out0 = concat(t, 1, &[p_out0, fpn_out0])?;
        let pan_out0 = t.call1("C3_n4", &*self.c3_n4, p_out0)?;

        Ok(tvec!(pan_out2, pan_out1, pan_out0))
    }

    layer_children!(
        backbone,
        upsample,
        lateral_conv0,
        c3_p4 as "C3_p4",
        reduce_conv1,
        c3_p3 as "C3_p3",
        bu_conv2,
        c3_n3 as "C3_n3",
        bu_conv1,
        c3_n4 as "C3_n4",
    );
}

/// Decoupled head: classification and regression branches per level.
///
/// Outputs `[batch, anchors, 5 + classes]`: box, objectness, class scores.
/// Boxes are raw offsets unless `decode_in_inference` is set, in which case
/// they are centers and sizes in input pixels.
#[derive(Debug)]
pub struct YoloxHead {
    pub num_classes: usize,
    pub strides: Vec<usize>,
    pub decode_in_inference: bool,
    pub cls_convs: Box<dyn Layer>,
    pub reg_convs: Box<dyn Layer>,
    pub cls_preds: Box<dyn Layer>,
    pub reg_preds: Box<dyn Layer>,
    pub obj_preds: Box<dyn Layer>,
    pub stems: Box<dyn Layer>,
}

impl YoloxHead {
    fn new(b: &mut Builder, num_classes: usize, width: f32) -> YoloxHead {
        let hidden = (256.0 * width) as usize;
        let mut lists: [Vec<Box<dyn Layer>>; 6] = Default::default();
        for cin in [256, 512, 1024].map(|c| (c as f32 * width) as usize) {
            lists[5].push(b.base_conv(cin, hidden, 1, 1));
            lists[0].push(b.branch(hidden));
            lists[1].push(b.branch(hidden));
            lists[2].push(b.pred(hidden, num_classes, Some(0.01)));
            lists[3].push(b.pred(hidden, 4, None));
            lists[4].push(b.pred(hidden, 1, Some(0.01)));
        }
        let [cls_convs, reg_convs, cls_preds, reg_preds, obj_preds, stems]: [Box<dyn Layer>; 6] =
            lists.map(|l| ModuleList::new(l).into());
        YoloxHead {
            num_classes,
            strides: vec![8, 16, 32],
            decode_in_inference: false,
            cls_convs,
            reg_convs,
            cls_preds,
            reg_preds,
            obj_preds,
            stems,
        }
    }

    /// Turn raw offsets into boxes: `(xy + grid) * stride`, `exp(wh) * stride`.
    fn decode(
        &self,
        t: &mut Tracer,
        outputs: OutletId,
        sizes: &[(usize, usize)],
    ) -> ExportResult<OutletId> {
        let mut grids = vec![];
        let mut strides = vec![];
        for (&(h, w), &stride) in sizes.iter().zip(self.strides.iter()) {
            for y in 0..h {
                for x in 0..w {
                    grids.extend([x as f32, y as f32]);
                    strides.push(stride as f32);
                }
            }
        }
        let n = strides.len();
        let grids = t.konst(Tensor::from(Array3::from_shape_vec((1, n, 2), grids)?.into_dyn()))?;
        let strides =
            t.konst(Tensor::from(Array3::from_shape_vec((1, n, 1), strides)?.into_dyn()))?;
        let xy = slice(t, outputs, &[0], &[2], &[2], &[1])?;
        let xy = t.op1(Add, &[xy, grids])?;
        let xy = t.op1(Mul, &[xy, strides])?;
        let wh = slice(t, outputs, &[2], &[4], &[2], &[1])?;
        let wh = t.op1(ew::Exp, &[wh])?;
        let wh = t.op1(Mul, &[wh, strides])?;
        let rest = slice(t, outputs, &[4], &[i64::MAX], &[2], &[1])?;
        concat(t, -1, &[xy, wh, rest])
    }
}

impl Layer for YoloxHead {
    fn name(&self) -> &'static str {
        "YOLOXHead"
    }

    fn forward(&self, t: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        ensure!(inputs.len() == self.strides.len(), "Head expects {} levels", self.strides.len());
        let mut levels = tvec!();
        let mut sizes = vec![];
        for (k, x) in inputs.iter().enumerate() {
            let x = t.call_item("stems", &*self.stems, k, &[*x])?[0];
            let cls_feat = t.call_item("cls_convs", &*self.cls_convs, k, &[x])?[0];
            let cls = t.call_item("cls_preds", &*self.cls_preds, k, &[cls_feat])?[0];
            let reg_feat = t.call_item("reg_convs", &*self.reg_convs, k, &[x])?[0];
            let reg = t.call_item("reg_preds", &*self.reg_preds, k, &[reg_feat])?[0];
            let obj = t.call_item("obj_preds", &*self.obj_preds, k, &[reg_feat])?[0];
            let obj = t.op1(ew::Sigmoid, &[obj])?;
            let cls = t.op1(ew::Sigmoid, &[cls])?;
            let level = concat(t, 1, &[reg, obj, cls])?;
            let fact = t.fact(level)?;
            sizes.push((fact.shape[2].to_usize()?, fact.shape[3].to_usize()?));
            let shape = t.konst(Tensor::from_i64s(&[0, 5 + self.num_classes as i64, -1]))?;
            levels.push(t.op1(Reshape, &[level, shape])?);
        }
        let outputs = concat(t, 2, &levels)?;
        let outputs = t.op1(Transpose::new(tvec!(0, 2, 1)), &[outputs])?;
        if self.decode_in_inference {
            Ok(tvec!(self.decode(t, outputs, &sizes)?))
        } else {
            Ok(tvec!(outputs))
        }
    }

    layer_children!(cls_convs, reg_convs, cls_preds, reg_preds, obj_preds, stems);
}

/// The whole detector.
#[derive(Debug)]
pub struct Yolox {
    pub backbone: Box<dyn Layer>,
    pub head: Box<dyn Layer>,
}

impl Yolox {
    pub fn new(exp: &Exp) -> ExportResult<Yolox> {
        ensure!(
            exp.depth > 0.0 && exp.width > 0.0 && exp.num_classes > 0,
            ExportError::Configuration(format!(
                "depth, width and num_classes must be positive, got {}, {} and {}",
                exp.depth, exp.width, exp.num_classes
            ))
        );
        let mut builder =
            Builder { seed: exp.seed, act: Act::parse(&exp.act)?, depthwise: exp.depthwise };
        let backbone = YoloPafpn::new(&mut builder, exp.depth, exp.width).into();
        let head = YoloxHead::new(&mut builder, exp.num_classes, exp.width).into();
        Ok(Yolox { backbone, head })
    }

    pub fn set_decode_in_inference(&mut self, decode: bool) -> ExportResult<()> {
        let head = self.head.downcast_mut::<YoloxHead>().context("Head is not a YOLOX head")?;
        head.decode_in_inference = decode;
        Ok(())
    }
}

impl Layer for Yolox {
    fn name(&self) -> &'static str {
        "YOLOX"
    }

    fn forward(&self, t: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        let features = t.call("backbone", &*self.backbone, inputs)?;
        t.call("head", &*self.head, &features)
    }

    layer_children!(backbone, head);
}
