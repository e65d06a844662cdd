//! Geometry wrappers.
//!
//! Geometries are a closed sum type, [`Geometry`], over one newtype per
//! concrete kind. Behaviour shared by every kind lives in [`GeometryOps`].
//!
//! Children reached through a parent (polygon rings, members of a
//! multi-geometry) follow one rule: when the parent wrapper owns its native
//! object, the child aliases the native sub-object and keeps the parent
//! alive; when the parent is itself borrowed, the child gets its own copy.

use std::sync::Arc;

use crate::context::MainContext;
use crate::error::{BindError, Result};
use crate::job::Job;
use crate::lock::locks;
use crate::native::NativePtr;
use crate::native::error::{guarded_opt, guarded_ptr, guarded_status};
use crate::native::geometry::{self as geom, Envelope, WkbType};
use crate::store::{ObjectId, object_store};

use super::{NativeObject, register_root};

pub struct GeometryInner {
    core: NativeObject,
    kind: WkbType,
    // Owner of the native sub-object this wrapper aliases.
    parent: Option<Geometry>,
}

impl GeometryInner {
    pub(crate) fn core(&self) -> &NativeObject {
        &self.core
    }
}

/// Conversion of a wrapped child into the type a parent hands out.
trait Part: Sized {
    fn from_geometry(g: Geometry) -> Result<Self>;
}

impl Part for Geometry {
    fn from_geometry(g: Geometry) -> Result<Self> {
        Ok(g)
    }
}

unsafe fn destroy_geometry(ptr: NativePtr) {
    unsafe { geom::geom_destroy(ptr) }
}

/// Concrete type of a native geometry. Rings report themselves as line
/// strings and are told apart by name.
unsafe fn concrete_type(ptr: NativePtr) -> WkbType {
    match unsafe { geom::geom_type(ptr) } {
        WkbType::LineString if unsafe { geom::geom_name(ptr) } == WkbType::LinearRing.tag() => {
            WkbType::LinearRing
        }
        other => other,
    }
}

macro_rules! geometry_kinds {
    ($($name:ident => $kind:ident),* $(,)?) => {
        $(
            #[derive(Clone)]
            pub struct $name(pub(crate) Arc<GeometryInner>);

            impl $name {
                fn empty() -> Result<Self> {
                    let ptr = guarded_ptr(|| geom::geom_create(WkbType::$kind))?;
                    match Geometry::from_owned(ptr)? {
                        Geometry::$name(g) => Ok(g),
                        other => Err(BindError::internal(format!(
                            "created {} where {} was requested",
                            other.kind_name(),
                            stringify!($name)
                        ))),
                    }
                }
            }

            impl GeometryOps for $name {
                fn inner(&self) -> &Arc<GeometryInner> {
                    &self.0
                }
            }

            impl From<$name> for Geometry {
                fn from(g: $name) -> Self {
                    Geometry::$name(g)
                }
            }

            impl TryFrom<Geometry> for $name {
                type Error = BindError;

                fn try_from(g: Geometry) -> Result<Self> {
                    match g {
                        Geometry::$name(g) => Ok(g),
                        other => Err(BindError::invalid(format!(
                            "expected {}, got {}",
                            stringify!($name),
                            other.kind_name()
                        ))),
                    }
                }
            }

            impl Part for $name {
                fn from_geometry(g: Geometry) -> Result<Self> {
                    Self::try_from(g)
                }
            }

            impl PartialEq for $name {
                fn eq(&self, other: &Self) -> bool {
                    Arc::ptr_eq(&self.0, &other.0)
                }
            }

            impl std::fmt::Debug for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    std::fmt::Debug::fmt(&self.0.core, f)
                }
            }
        )*

        /// A geometry of any concrete kind.
        #[derive(Clone, PartialEq, Debug)]
        pub enum Geometry {
            $($name($name),)*
        }

        impl Geometry {
            fn from_inner_checked(inner: Arc<GeometryInner>) -> Result<Self> {
                match inner.kind {
                    $(WkbType::$kind => Ok(Geometry::$name($name(inner))),)*
                    WkbType::Unknown => Err(BindError::internal("geometry of unknown type")),
                }
            }
        }

        impl GeometryOps for Geometry {
            fn inner(&self) -> &Arc<GeometryInner> {
                match self {
                    $(Geometry::$name(g) => &g.0,)*
                }
            }
        }

        fn type_name(kind: WkbType) -> &'static str {
            match kind {
                $(WkbType::$kind => stringify!($name),)*
                WkbType::Unknown => "Geometry",
            }
        }
    };
}

geometry_kinds! {
    Point => Point,
    LineString => LineString,
    LinearRing => LinearRing,
    Polygon => Polygon,
    MultiPoint => MultiPoint,
    MultiLineString => MultiLineString,
    MultiPolygon => MultiPolygon,
    GeometryCollection => GeometryCollection,
}

/// Operations every geometry kind supports.
pub trait GeometryOps {
    #[doc(hidden)]
    fn inner(&self) -> &Arc<GeometryInner>;

    fn id(&self) -> ObjectId {
        self.inner().core.id()
    }

    fn is_alive(&self) -> bool {
        self.inner().core.is_alive()
    }

    /// Whether this wrapper destroys its native geometry when disposed.
    fn is_owned(&self) -> bool {
        self.inner().core.is_owned()
    }

    /// The geometry this one aliases a part of, if any.
    fn parent_geometry(&self) -> Option<Geometry> {
        self.inner().parent.clone()
    }

    /// Concrete kind, e.g. `"LinearRing"`.
    fn kind_name(&self) -> &'static str {
        self.inner().core.kind()
    }

    fn to_wkt(&self) -> Result<String> {
        self.inner()
            .core
            .call(|p| Ok(unsafe { geom::geom_to_wkt(p) }))
    }

    /// Bounding box; `None` for an empty geometry.
    fn envelope(&self) -> Result<Option<Envelope>> {
        self.inner()
            .core
            .call(|p| Ok(unsafe { geom::geom_envelope(p) }))
    }

    fn area(&self) -> Result<f64> {
        self.inner().core.call(|p| Ok(unsafe { geom::geom_area(p) }))
    }

    fn length(&self) -> Result<f64> {
        self.inner()
            .core
            .call(|p| Ok(unsafe { geom::geom_length(p) }))
    }

    fn is_empty(&self) -> Result<bool> {
        self.inner()
            .core
            .call(|p| Ok(unsafe { geom::geom_is_empty(p) }))
    }

    /// A new, owned point at the centroid.
    fn centroid(&self) -> Result<Point> {
        let ptr = self
            .inner()
            .core
            .call(|p| guarded_ptr(|| unsafe { geom::geom_centroid(p) }))?;
        Point::try_from(Geometry::from_owned(ptr)?)
    }

    fn equals(&self, other: &dyn GeometryOps) -> Result<bool> {
        with_pair(self.inner(), other.inner(), |a, b| unsafe {
            geom::geom_equals(a, b)
        })
    }

    /// Whether the bounding boxes intersect.
    fn intersects(&self, other: &dyn GeometryOps) -> Result<bool> {
        with_pair(self.inner(), other.inner(), |a, b| unsafe {
            geom::geom_envelope_intersects(a, b)
        })
    }

    /// An owned deep copy.
    fn clone_geometry(&self) -> Result<Geometry> {
        let ptr = self
            .inner()
            .core
            .call(|p| guarded_ptr(|| unsafe { geom::geom_clone(p) }))?;
        Geometry::from_owned(ptr)
    }

    fn centroid_async(&self, ctx: &MainContext, callback: impl FnOnce(Result<Point>) + 'static)
    where
        Self: Sized,
    {
        let inner = self.inner();
        let ptr = match inner.core.ptr() {
            Ok(ptr) => ptr,
            Err(e) => return callback(Err(e)),
        };
        Job::new("Geometry::centroid", move |_| {
            guarded_ptr(|| unsafe { geom::geom_centroid(ptr) })
        })
        .lock(inner.core.root_id())
        .persist(inner.clone())
        .rval(|ptr, _| Point::try_from(Geometry::from_owned(ptr)?))
        .run_async(ctx, callback);
    }

    fn to_wkt_async(&self, ctx: &MainContext, callback: impl FnOnce(Result<String>) + 'static)
    where
        Self: Sized,
    {
        let inner = self.inner();
        let ptr = match inner.core.ptr() {
            Ok(ptr) => ptr,
            Err(e) => return callback(Err(e)),
        };
        Job::new("Geometry::to_wkt", move |_| Ok(unsafe { geom::geom_to_wkt(ptr) }))
            .lock(inner.core.root_id())
            .persist(inner.clone())
            .run_async(ctx, callback);
    }

    /// Dispose the wrapper now. Aliased children become unusable; an owned
    /// geometry is destroyed once no job holds its lock.
    fn dispose(&self) -> Result<()> {
        let core = &self.inner().core;
        let _guard = if core.is_owned() && core.is_alive() {
            Some(locks().acquire(&[core.root_id()])?)
        } else {
            None
        };
        core.dispose();
        Ok(())
    }
}

fn with_pair<T>(
    a: &GeometryInner,
    b: &GeometryInner,
    f: impl FnOnce(NativePtr, NativePtr) -> T,
) -> Result<T> {
    a.core.ptr()?;
    b.core.ptr()?;
    let _guard = locks().acquire(&[a.core.root_id(), b.core.root_id()])?;
    Ok(f(a.core.ptr()?, b.core.ptr()?))
}

impl Geometry {
    /// Wrap a geometry the caller just created and hands over.
    pub(crate) fn from_owned(ptr: NativePtr) -> Result<Self> {
        let kind = unsafe { concrete_type(ptr) };
        let inner = register_root(ptr, destroy_geometry, |id| GeometryInner {
            core: NativeObject::root(ptr, id, type_name(kind), destroy_geometry),
            kind,
            parent: None,
        })?;
        Self::from_inner_checked(inner)
    }

    /// Wrap sub-object `ptr` of `parent`: alias it when the parent owns
    /// its geometry, copy it otherwise.
    fn wrap_child(parent: &Geometry, ptr: NativePtr) -> Result<Self> {
        let owner = parent.inner();
        if !owner.core.is_owned() {
            let copy = guarded_ptr(|| unsafe { geom::geom_clone(ptr) })?;
            return Self::from_owned(copy);
        }
        if !object_store().has(owner.core.raw()) {
            return Err(BindError::internal(format!(
                "parent geometry of {ptr} is not registered"
            )));
        }
        let kind = unsafe { concrete_type(ptr) };
        let inner = object_store().wrap(ptr, owner.core.id(), |id| GeometryInner {
            core: NativeObject::child(ptr, id, owner.core.id(), owner.core.root_id(), type_name(kind)),
            kind,
            parent: Some(parent.clone()),
        })?;
        Self::from_inner_checked(inner)
    }

    /// Rebuild the sum type around a wrapper handed out as a raw handle.
    pub(crate) fn from_inner(inner: Arc<GeometryInner>) -> Result<Self> {
        Self::from_inner_checked(inner)
    }

    /// Parse well-known text.
    pub fn from_wkt(text: &str) -> Result<Self> {
        let ptr = guarded_ptr(|| geom::geom_from_wkt(text))?;
        Self::from_owned(ptr)
    }

    pub fn wkb_type(&self) -> WkbType {
        self.inner().kind
    }

    fn children(&self) -> Result<Vec<Geometry>> {
        let parts = self.inner().core.call(|p| {
            let count = unsafe { geom::geom_sub_count(p) };
            (0..count)
                .map(|i| guarded_ptr(|| unsafe { geom::geom_get_sub(p, i) }))
                .collect::<Result<Vec<_>>>()
        })?;
        parts
            .into_iter()
            .map(|ptr| Self::wrap_child(self, ptr))
            .collect()
    }

    fn child(&self, index: usize) -> Result<Geometry> {
        let ptr = self
            .inner()
            .core
            .call(|p| guarded_ptr(|| unsafe { geom::geom_get_sub(p, index) }))?;
        Self::wrap_child(self, ptr)
    }

    /// Append a copy of `part`.
    fn add_part(&self, part: &dyn GeometryOps) -> Result<()> {
        let (whole, part) = (self.inner(), part.inner());
        whole.core.ptr()?;
        part.core.ptr()?;
        let _guard = locks().acquire(&[whole.core.root_id(), part.core.root_id()])?;
        let (whole_ptr, part_ptr) = (whole.core.ptr()?, part.core.ptr()?);
        guarded_status(|| unsafe { geom::geom_add_sub(whole_ptr, part_ptr) })
    }
}

fn typed<T: Part>(parts: Vec<Geometry>) -> Result<Vec<T>> {
    parts.into_iter().map(T::from_geometry).collect()
}

impl Point {
    pub fn new(x: f64, y: f64) -> Result<Self> {
        let point = Self::empty()?;
        point
            .0
            .core
            .call(|p| guarded_status(|| unsafe { geom::geom_set_point(p, 0, x, y) }))?;
        Ok(point)
    }

    /// Coordinates; `None` for an empty point.
    pub fn coords(&self) -> Result<Option<[f64; 2]>> {
        self.0.core.call(|p| {
            if unsafe { geom::geom_point_count(p) } == 0 {
                return Ok(None);
            }
            guarded_opt(|| unsafe { geom::geom_get_point(p, 0) }).map(Some)
        })
    }
}

macro_rules! point_sequence {
    ($($name:ident),*) => {
        $(
            impl $name {
                pub fn new() -> Result<Self> {
                    Self::empty()
                }

                pub fn point_count(&self) -> Result<usize> {
                    self.0
                        .core
                        .call(|p| Ok(unsafe { geom::geom_point_count(p) }))
                }

                pub fn add_point(&self, x: f64, y: f64) -> Result<()> {
                    self.0
                        .core
                        .call(|p| guarded_status(|| unsafe { geom::geom_add_point(p, x, y) }))
                }

                pub fn set_point(&self, index: usize, x: f64, y: f64) -> Result<()> {
                    self.0.core.call(|p| {
                        guarded_status(|| unsafe { geom::geom_set_point(p, index, x, y) })
                    })
                }

                /// Owned copies of the vertices.
                pub fn points(&self) -> Result<Vec<Point>> {
                    let coords = self.0.core.call(|p| {
                        let count = unsafe { geom::geom_point_count(p) };
                        (0..count)
                            .map(|i| guarded_opt(|| unsafe { geom::geom_get_point(p, i) }))
                            .collect::<Result<Vec<_>>>()
                    })?;
                    coords.into_iter().map(|[x, y]| Point::new(x, y)).collect()
                }
            }
        )*
    };
}

point_sequence!(LineString, LinearRing);

impl Polygon {
    pub fn new() -> Result<Self> {
        Self::empty()
    }

    pub fn rings(&self) -> Result<Vec<LinearRing>> {
        typed(Geometry::from(self.clone()).children()?)
    }

    /// Ring `index`; 0 is the exterior ring.
    pub fn ring(&self, index: usize) -> Result<LinearRing> {
        LinearRing::try_from(Geometry::from(self.clone()).child(index)?)
    }

    /// Append a copy of `ring`.
    pub fn add_ring(&self, ring: &LinearRing) -> Result<()> {
        Geometry::from(self.clone()).add_part(ring)
    }
}

macro_rules! multi_geometry {
    ($($name:ident of $part:ty),*) => {
        $(
            impl $name {
                pub fn new() -> Result<Self> {
                    Self::empty()
                }

                pub fn count(&self) -> Result<usize> {
                    self.0
                        .core
                        .call(|p| Ok(unsafe { geom::geom_sub_count(p) }))
                }

                pub fn children(&self) -> Result<Vec<$part>> {
                    typed(Geometry::from(self.clone()).children()?)
                }

                pub fn get(&self, index: usize) -> Result<$part> {
                    <$part as Part>::from_geometry(Geometry::from(self.clone()).child(index)?)
                }
            }
        )*
    };
}

multi_geometry!(
    MultiPoint of Point,
    MultiLineString of LineString,
    MultiPolygon of Polygon,
    GeometryCollection of Geometry
);

impl MultiPoint {
    pub fn add(&self, point: &Point) -> Result<()> {
        Geometry::from(self.clone()).add_part(point)
    }
}

impl MultiLineString {
    pub fn add(&self, line: &LineString) -> Result<()> {
        Geometry::from(self.clone()).add_part(line)
    }
}

impl MultiPolygon {
    pub fn add(&self, polygon: &Polygon) -> Result<()> {
        Geometry::from(self.clone()).add_part(polygon)
    }
}

impl GeometryCollection {
    /// Append a copy of any geometry.
    pub fn add(&self, geometry: &dyn GeometryOps) -> Result<()> {
        Geometry::from(self.clone()).add_part(geometry)
    }
}
