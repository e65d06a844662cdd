//! Vector geometries.
//!
//! A geometry is either a coordinate sequence (points, line strings, rings)
//! or a list of owned sub-geometries (polygon rings, multi-geometries,
//! collections). Sub-geometry handles returned by [`geom_get_sub`] are
//! borrowed from the parent and die with it.
//!
//! One historical quirk is kept: [`geom_type`] reports a linear ring as a
//! line string. Only [`geom_name`] tells the two apart.

use super::NativePtr;
use super::error::{CplErr, ErrorNum, fail, report};

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WkbType {
    Unknown = 0,
    Point = 1,
    LineString = 2,
    Polygon = 3,
    MultiPoint = 4,
    MultiLineString = 5,
    MultiPolygon = 6,
    GeometryCollection = 7,
    LinearRing = 101,
}

impl WkbType {
    pub fn tag(self) -> &'static str {
        match self {
            WkbType::Unknown => "GEOMETRY",
            WkbType::Point => "POINT",
            WkbType::LineString => "LINESTRING",
            WkbType::Polygon => "POLYGON",
            WkbType::MultiPoint => "MULTIPOINT",
            WkbType::MultiLineString => "MULTILINESTRING",
            WkbType::MultiPolygon => "MULTIPOLYGON",
            WkbType::GeometryCollection => "GEOMETRYCOLLECTION",
            WkbType::LinearRing => "LINEARRING",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        [
            WkbType::Point,
            WkbType::LineString,
            WkbType::Polygon,
            WkbType::MultiPoint,
            WkbType::MultiLineString,
            WkbType::MultiPolygon,
            WkbType::GeometryCollection,
            WkbType::LinearRing,
        ]
        .into_iter()
        .find(|t| t.tag() == tag)
    }

    fn holds_coords(self) -> bool {
        matches!(
            self,
            WkbType::Point | WkbType::LineString | WkbType::LinearRing
        )
    }

    fn accepts_part(self, part: WkbType) -> bool {
        match self {
            WkbType::Polygon => part == WkbType::LinearRing,
            WkbType::MultiPoint => part == WkbType::Point,
            WkbType::MultiLineString => part == WkbType::LineString,
            WkbType::MultiPolygon => part == WkbType::Polygon,
            WkbType::GeometryCollection => true,
            _ => false,
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Envelope {
    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeGeometry {
    kind: WkbType,
    coords: Vec<[f64; 2]>,
    parts: Vec<Box<NativeGeometry>>,
}

impl NativeGeometry {
    fn empty(kind: WkbType) -> Self {
        Self {
            kind,
            coords: Vec::new(),
            parts: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        if self.kind.holds_coords() {
            self.coords.is_empty()
        } else {
            self.parts.is_empty()
        }
    }

    fn for_each_coord(&self, f: &mut dyn FnMut([f64; 2])) {
        self.coords.iter().for_each(|c| f(*c));
        self.parts.iter().for_each(|p| p.for_each_coord(f));
    }
}

unsafe fn geom<'a>(g: NativePtr) -> &'a mut NativeGeometry {
    unsafe { g.as_mut::<NativeGeometry>() }
}

/// Create an empty geometry of the given type.
pub fn geom_create(kind: WkbType) -> NativePtr {
    if kind == WkbType::Unknown {
        report(
            ErrorNum::NotSupported,
            "cannot create a geometry of unknown type",
        );
        return NativePtr::NULL;
    }
    NativePtr::from_box(Box::new(NativeGeometry::empty(kind)))
}

/// # Safety
///
/// `g` must be a live, top-level geometry (not borrowed from a parent).
pub unsafe fn geom_destroy(g: NativePtr) {
    drop(unsafe { g.into_box::<NativeGeometry>() });
}

/// # Safety
///
/// `g` must be a live geometry.
pub unsafe fn geom_clone(g: NativePtr) -> NativePtr {
    NativePtr::from_box(Box::new(unsafe { geom(g) }.clone()))
}

/// Type code of the geometry. Linear rings report [`WkbType::LineString`].
///
/// # Safety
///
/// `g` must be a live geometry.
pub unsafe fn geom_type(g: NativePtr) -> WkbType {
    match unsafe { geom(g) }.kind {
        WkbType::LinearRing => WkbType::LineString,
        other => other,
    }
}

/// Upper-case name of the geometry's concrete type.
///
/// # Safety
///
/// `g` must be a live geometry.
pub unsafe fn geom_name(g: NativePtr) -> &'static str {
    unsafe { geom(g) }.kind.tag()
}

/// # Safety
///
/// `g` must be a live geometry.
pub unsafe fn geom_is_empty(g: NativePtr) -> bool {
    unsafe { geom(g) }.is_empty()
}

/// # Safety
///
/// `g` must be a live geometry.
pub unsafe fn geom_point_count(g: NativePtr) -> usize {
    unsafe { geom(g) }.coords.len()
}

/// # Safety
///
/// `g` must be a live geometry.
pub unsafe fn geom_get_point(g: NativePtr, index: usize) -> Option<[f64; 2]> {
    let point = unsafe { geom(g) }.coords.get(index).copied();
    if point.is_none() {
        report(ErrorNum::IllegalArg, format!("point index {index} out of range"));
    }
    point
}

/// Set point `index`; `index == count` appends.
///
/// # Safety
///
/// `g` must be a live geometry.
pub unsafe fn geom_set_point(g: NativePtr, index: usize, x: f64, y: f64) -> CplErr {
    let g = unsafe { geom(g) };
    if !g.kind.holds_coords() {
        return fail(
            ErrorNum::NotSupported,
            format!("{} has no points", g.kind.tag()),
        );
    }
    let limit = if g.kind == WkbType::Point {
        0
    } else {
        g.coords.len()
    };
    if index > limit {
        return fail(ErrorNum::IllegalArg, format!("point index {index} out of range"));
    }
    if index == g.coords.len() {
        g.coords.push([x, y]);
    } else {
        g.coords[index] = [x, y];
    }
    CplErr::None
}

/// # Safety
///
/// `g` must be a live geometry.
pub unsafe fn geom_add_point(g: NativePtr, x: f64, y: f64) -> CplErr {
    let count = unsafe { geom(g) }.coords.len();
    unsafe { geom_set_point(g, count, x, y) }
}

/// # Safety
///
/// `g` must be a live geometry.
pub unsafe fn geom_sub_count(g: NativePtr) -> usize {
    unsafe { geom(g) }.parts.len()
}

/// Borrowed handle of sub-geometry `index`, owned by `g`.
///
/// # Safety
///
/// `g` must be a live geometry.
pub unsafe fn geom_get_sub(g: NativePtr, index: usize) -> NativePtr {
    match unsafe { geom(g) }.parts.get(index) {
        Some(part) => NativePtr::from_raw(&**part as *const NativeGeometry),
        None => {
            report(
                ErrorNum::IllegalArg,
                format!("sub-geometry index {index} out of range"),
            );
            NativePtr::NULL
        }
    }
}

/// Append a copy of `sub` to `g`.
///
/// # Safety
///
/// Both handles must be live geometries.
pub unsafe fn geom_add_sub(g: NativePtr, sub: NativePtr) -> CplErr {
    let part = unsafe { geom(sub) }.clone();
    let g = unsafe { geom(g) };
    if !g.kind.accepts_part(part.kind) {
        return fail(
            ErrorNum::NotSupported,
            format!("cannot add {} to {}", part.kind.tag(), g.kind.tag()),
        );
    }
    g.parts.push(Box::new(part));
    CplErr::None
}

/// # Safety
///
/// `g` must be a live geometry.
pub unsafe fn geom_envelope(g: NativePtr) -> Option<Envelope> {
    let mut env: Option<Envelope> = None;
    unsafe { geom(g) }.for_each_coord(&mut |[x, y]| {
        let e = env.get_or_insert(Envelope {
            min_x: x,
            max_x: x,
            min_y: y,
            max_y: y,
        });
        e.min_x = e.min_x.min(x);
        e.max_x = e.max_x.max(x);
        e.min_y = e.min_y.min(y);
        e.max_y = e.max_y.max(y);
    });
    env
}

fn signed_ring_area(coords: &[[f64; 2]]) -> f64 {
    coords
        .windows(2)
        .map(|w| w[0][0] * w[1][1] - w[1][0] * w[0][1])
        .sum::<f64>()
        / 2.0
}

fn area(g: &NativeGeometry) -> f64 {
    match g.kind {
        WkbType::LinearRing => signed_ring_area(&g.coords).abs(),
        WkbType::Polygon => {
            let mut rings = g.parts.iter().map(|r| signed_ring_area(&r.coords).abs());
            let shell = rings.next().unwrap_or(0.0);
            shell - rings.sum::<f64>()
        }
        WkbType::MultiPolygon | WkbType::GeometryCollection => g.parts.iter().map(|p| area(p)).sum(),
        _ => 0.0,
    }
}

fn path_length(coords: &[[f64; 2]]) -> f64 {
    coords
        .windows(2)
        .map(|w| (w[1][0] - w[0][0]).hypot(w[1][1] - w[0][1]))
        .sum()
}

fn length(g: &NativeGeometry) -> f64 {
    match g.kind {
        WkbType::LineString | WkbType::LinearRing => path_length(&g.coords),
        WkbType::MultiLineString | WkbType::GeometryCollection => {
            g.parts.iter().map(|p| length(p)).sum()
        }
        _ => 0.0,
    }
}

/// # Safety
///
/// `g` must be a live geometry.
pub unsafe fn geom_area(g: NativePtr) -> f64 {
    area(unsafe { geom(g) })
}

/// # Safety
///
/// `g` must be a live geometry.
pub unsafe fn geom_length(g: NativePtr) -> f64 {
    length(unsafe { geom(g) })
}

fn dimension(g: &NativeGeometry) -> i8 {
    match g.kind {
        WkbType::Point | WkbType::MultiPoint => 0,
        WkbType::LineString | WkbType::LinearRing | WkbType::MultiLineString => 1,
        WkbType::Polygon | WkbType::MultiPolygon => 2,
        _ => g.parts.iter().map(|p| dimension(p)).max().unwrap_or(-1),
    }
}

/// Weighted sum (x, y, weight) of the parts of `g` of dimension `dim`.
fn accumulate(g: &NativeGeometry, dim: i8, acc: &mut [f64; 3]) {
    match dim {
        2 if g.kind == WkbType::Polygon => {
            for (i, ring) in g.parts.iter().enumerate() {
                let a = signed_ring_area(&ring.coords);
                if a == 0.0 {
                    continue;
                }
                let (mut cx, mut cy) = (0.0, 0.0);
                for w in ring.coords.windows(2) {
                    let cross = w[0][0] * w[1][1] - w[1][0] * w[0][1];
                    cx += (w[0][0] + w[1][0]) * cross;
                    cy += (w[0][1] + w[1][1]) * cross;
                }
                let (cx, cy) = (cx / (6.0 * a), cy / (6.0 * a));
                let weight = if i == 0 { a.abs() } else { -a.abs() };
                acc[0] += cx * weight;
                acc[1] += cy * weight;
                acc[2] += weight;
            }
        }
        1 if g.kind.holds_coords() => {
            for w in g.coords.windows(2) {
                let len = (w[1][0] - w[0][0]).hypot(w[1][1] - w[0][1]);
                acc[0] += (w[0][0] + w[1][0]) / 2.0 * len;
                acc[1] += (w[0][1] + w[1][1]) / 2.0 * len;
                acc[2] += len;
            }
        }
        0 => g.for_each_coord(&mut |[x, y]| {
            acc[0] += x;
            acc[1] += y;
            acc[2] += 1.0;
        }),
        _ => g.parts.iter().for_each(|p| accumulate(p, dim, acc)),
    }
}

/// New point at the centroid of `g` (empty point for an empty geometry).
///
/// # Safety
///
/// `g` must be a live geometry.
pub unsafe fn geom_centroid(g: NativePtr) -> NativePtr {
    let g = unsafe { geom(g) };
    let mut point = NativeGeometry::empty(WkbType::Point);
    let mut dim = dimension(g);
    while dim >= 0 {
        let mut acc = [0.0; 3];
        accumulate(g, dim, &mut acc);
        if acc[2] != 0.0 {
            point.coords.push([acc[0] / acc[2], acc[1] / acc[2]]);
            break;
        }
        dim -= 1;
    }
    NativePtr::from_box(Box::new(point))
}

/// Exact structural equality.
///
/// # Safety
///
/// Both handles must be live geometries.
pub unsafe fn geom_equals(a: NativePtr, b: NativePtr) -> bool {
    unsafe { a.as_ref::<NativeGeometry>() == b.as_ref::<NativeGeometry>() }
}

/// Whether the bounding boxes of `a` and `b` intersect.
///
/// # Safety
///
/// Both handles must be live geometries.
pub unsafe fn geom_envelope_intersects(a: NativePtr, b: NativePtr) -> bool {
    match unsafe { (geom_envelope(a), geom_envelope(b)) } {
        (Some(ea), Some(eb)) => ea.intersects(&eb),
        _ => false,
    }
}

fn coord_text(c: &[f64; 2]) -> String {
    format!("{} {}", c[0], c[1])
}

fn coords_text(coords: &[[f64; 2]]) -> String {
    let items: Vec<String> = coords.iter().map(coord_text).collect();
    format!("({})", items.join(","))
}

fn wkt_body(g: &NativeGeometry) -> String {
    let list = |items: Vec<String>| format!("({})", items.join(","));
    match g.kind {
        WkbType::Point | WkbType::LineString | WkbType::LinearRing => coords_text(&g.coords),
        WkbType::Polygon | WkbType::MultiLineString | WkbType::MultiPoint => {
            list(g.parts.iter().map(|p| coords_text(&p.coords)).collect())
        }
        WkbType::MultiPolygon => list(g.parts.iter().map(|p| wkt_body(p)).collect()),
        WkbType::GeometryCollection | WkbType::Unknown => {
            list(g.parts.iter().map(|p| wkt(p)).collect())
        }
    }
}

fn wkt(g: &NativeGeometry) -> String {
    if g.is_empty() {
        format!("{} EMPTY", g.kind.tag())
    } else {
        format!("{} {}", g.kind.tag(), wkt_body(g))
    }
}

/// # Safety
///
/// `g` must be a live geometry.
pub unsafe fn geom_to_wkt(g: NativePtr) -> String {
    wkt(unsafe { geom(g) })
}

/// Parse well-known text into a new geometry; null on failure.
pub fn geom_from_wkt(text: &str) -> NativePtr {
    let mut parser = WktParser { src: text, pos: 0 };
    let parsed = parser.geometry().and_then(|g| {
        parser.skip_ws();
        if parser.pos == parser.src.len() {
            Ok(g)
        } else {
            Err(format!("unexpected text at offset {}", parser.pos))
        }
    });
    match parsed {
        Ok(g) => NativePtr::from_box(Box::new(g)),
        Err(msg) => {
            report(ErrorNum::AppDefined, format!("Failed to parse WKT: {msg}"));
            NativePtr::NULL
        }
    }
}

struct WktParser<'a> {
    src: &'a str,
    pos: usize,
}

impl WktParser<'_> {
    fn rest(&self) -> &str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let remaining = self.rest().trim_start().len();
        self.pos = self.src.len() - remaining;
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.rest().starts_with(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), String> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(format!("expected `{c}' at offset {}", self.pos))
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &str {
        self.skip_ws();
        let len = self
            .rest()
            .find(|c: char| !pred(c))
            .unwrap_or(self.rest().len());
        let start = self.pos;
        self.pos += len;
        &self.src[start..self.pos]
    }

    fn word(&mut self) -> String {
        self.take_while(|c| c.is_ascii_alphabetic())
            .to_ascii_uppercase()
    }

    fn starts_number(&mut self) -> bool {
        self.skip_ws();
        self.rest()
            .starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+' || c == '.')
    }

    fn number(&mut self) -> Result<f64, String> {
        let at = self.pos;
        let tok = self.take_while(|c| c.is_ascii_digit() || "+-.eE".contains(c));
        tok.parse()
            .map_err(|_| format!("invalid number at offset {at}"))
    }

    fn coord(&mut self) -> Result<[f64; 2], String> {
        let x = self.number()?;
        let y = self.number()?;
        // Z and M ordinates are accepted and dropped.
        while self.starts_number() {
            self.number()?;
        }
        Ok([x, y])
    }

    fn coord_list(&mut self) -> Result<Vec<[f64; 2]>, String> {
        self.expect('(')?;
        let mut coords = vec![self.coord()?];
        while self.eat(',') {
            coords.push(self.coord()?);
        }
        self.expect(')')?;
        Ok(coords)
    }

    fn list<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T, String>) -> Result<Vec<T>, String> {
        self.expect('(')?;
        let mut items = vec![item(self)?];
        while self.eat(',') {
            items.push(item(self)?);
        }
        self.expect(')')?;
        Ok(items)
    }

    fn leaf(kind: WkbType, coords: Vec<[f64; 2]>) -> Box<NativeGeometry> {
        Box::new(NativeGeometry {
            kind,
            coords,
            parts: Vec::new(),
        })
    }

    fn rings(&mut self) -> Result<Vec<Box<NativeGeometry>>, String> {
        self.list(|p| Ok(Self::leaf(WkbType::LinearRing, p.coord_list()?)))
    }

    fn geometry(&mut self) -> Result<NativeGeometry, String> {
        let tag = self.word();
        let kind = WkbType::from_tag(&tag).ok_or_else(|| format!("unknown geometry type `{tag}'"))?;
        let mut g = NativeGeometry::empty(kind);
        let mut modifier = self.word();
        if matches!(modifier.as_str(), "Z" | "M" | "ZM") {
            modifier = self.word();
        }
        match modifier.as_str() {
            "EMPTY" => return Ok(g),
            "" => {}
            other => return Err(format!("unexpected `{other}'")),
        }
        match kind {
            WkbType::Point => {
                self.expect('(')?;
                g.coords.push(self.coord()?);
                self.expect(')')?;
            }
            WkbType::LineString | WkbType::LinearRing => g.coords = self.coord_list()?,
            WkbType::Polygon => g.parts = self.rings()?,
            WkbType::MultiPoint => {
                g.parts = self.list(|p| {
                    let c = if p.eat('(') {
                        let c = p.coord()?;
                        p.expect(')')?;
                        c
                    } else {
                        p.coord()?
                    };
                    Ok(Self::leaf(WkbType::Point, vec![c]))
                })?
            }
            WkbType::MultiLineString => {
                g.parts = self.list(|p| Ok(Self::leaf(WkbType::LineString, p.coord_list()?)))?
            }
            WkbType::MultiPolygon => {
                g.parts = self.list(|p| {
                    Ok(Box::new(NativeGeometry {
                        kind: WkbType::Polygon,
                        coords: Vec::new(),
                        parts: p.rings()?,
                    }))
                })?
            }
            WkbType::GeometryCollection => g.parts = self.list(|p| p.geometry().map(Box::new))?,
            WkbType::Unknown => unreachable!("from_tag never yields Unknown"),
        }
        Ok(g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::error::{error_reset, guarded_ptr};

    fn parse(text: &str) -> NativePtr {
        guarded_ptr(|| geom_from_wkt(text)).unwrap()
    }

    #[test]
    fn wkt_round_trip_keeps_structure() {
        for text in [
            "POINT (1 2)",
            "LINESTRING (0 0,1 1,2 0.5)",
            "POLYGON ((0 0,4 0,4 4,0 4,0 0),(1 1,2 1,2 2,1 1))",
            "MULTIPOINT ((1 2),(3 4))",
            "MULTIPOLYGON (((0 0,1 0,1 1,0 0)),((5 5,6 5,6 6,5 5)))",
            "GEOMETRYCOLLECTION (POINT (1 1),LINESTRING (0 0,1 0))",
            "POLYGON EMPTY",
        ] {
            let g = parse(text);
            assert_eq!(unsafe { geom_to_wkt(g) }, text);
            unsafe { geom_destroy(g) };
        }
    }

    #[test]
    fn lenient_input_forms() {
        let g = parse("  multipoint (1 2, 3 4)");
        assert_eq!(unsafe { geom_to_wkt(g) }, "MULTIPOINT ((1 2),(3 4))");
        unsafe { geom_destroy(g) };
        let g = parse("POINT Z (1 2 3)");
        assert_eq!(unsafe { geom_to_wkt(g) }, "POINT (1 2)");
        unsafe { geom_destroy(g) };
    }

    #[test]
    fn malformed_wkt_reports() {
        let err = guarded_ptr(|| geom_from_wkt("POLYGON ((0 0, 1 1)")).unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse WKT"));
        assert!(guarded_ptr(|| geom_from_wkt("CIRCLE (0 0)")).is_err());
        assert!(guarded_ptr(|| geom_from_wkt("POINT (1 2) trailing")).is_err());
    }

    #[test]
    fn ring_misreports_its_type() {
        let ring = geom_create(WkbType::LinearRing);
        unsafe {
            assert_eq!(geom_type(ring), WkbType::LineString);
            assert_eq!(geom_name(ring), "LINEARRING");
            geom_destroy(ring);
        }
    }

    #[test]
    fn polygon_measures() {
        let g = parse("POLYGON ((0 0,4 0,4 4,0 4,0 0),(1 1,3 1,3 3,1 3,1 1))");
        unsafe {
            assert_eq!(geom_area(g), 12.0);
            let c = geom_centroid(g);
            assert_eq!(geom_get_point(c, 0), Some([2.0, 2.0]));
            geom_destroy(c);
            let env = geom_envelope(g).unwrap();
            assert_eq!((env.min_x, env.max_x, env.min_y, env.max_y), (0.0, 4.0, 0.0, 4.0));
            geom_destroy(g);
        }
    }

    #[test]
    fn line_length_and_centroid() {
        let g = parse("LINESTRING (0 0,4 0)");
        unsafe {
            assert_eq!(geom_length(g), 4.0);
            let c = geom_centroid(g);
            assert_eq!(geom_to_wkt(c), "POINT (2 0)");
            geom_destroy(c);
            geom_destroy(g);
        }
    }

    #[test]
    fn add_sub_checks_compatibility() {
        let poly = geom_create(WkbType::Polygon);
        let line = parse("LINESTRING (0 0,1 1)");
        let ring = parse("LINEARRING (0 0,1 0,1 1,0 0)");
        unsafe {
            assert_eq!(geom_add_sub(poly, line), CplErr::Failure);
            error_reset();
            assert_eq!(geom_add_sub(poly, ring), CplErr::None);
            assert_eq!(geom_sub_count(poly), 1);
            let borrowed = geom_get_sub(poly, 0);
            assert_ne!(borrowed, ring);
            assert!(geom_equals(borrowed, ring));
            geom_destroy(line);
            geom_destroy(ring);
            geom_destroy(poly);
        }
    }

    #[test]
    fn envelope_intersection() {
        let a = parse("LINESTRING (0 0,2 2)");
        let b = parse("POINT (1 1)");
        let c = parse("POINT (5 5)");
        unsafe {
            assert!(geom_envelope_intersects(a, b));
            assert!(!geom_envelope_intersects(a, c));
            for g in [a, b, c] {
                geom_destroy(g);
            }
        }
    }

    #[test]
    fn point_accepts_single_coordinate() {
        let p = geom_create(WkbType::Point);
        unsafe {
            assert_eq!(geom_set_point(p, 0, 3.0, 4.0), CplErr::None);
            assert_eq!(geom_set_point(p, 1, 0.0, 0.0), CplErr::Failure);
            error_reset();
            assert_eq!(geom_to_wkt(p), "POINT (3 4)");
            geom_destroy(p);
        }
    }
}
