//! Signature layout descriptions.
//!
//! A layout says where and how the signature is rendered. It is built once
//! per request from the raw request geometry and never changes afterwards.
//! The target page may be left as [`PageSelector::Last`] because the page
//! count is only known once the document is opened.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Page that receives a visible signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSelector {
    /// The last page of the document
    Last,
    /// A 1-based page number
    Number(u32),
}

impl PageSelector {
    /// Interpret a request page number: zero or negative means the last page.
    pub fn from_request(page: i32) -> Self {
        if page < 1 {
            PageSelector::Last
        } else {
            PageSelector::Number(page as u32)
        }
    }

    /// Resolve against the actual page count, clamping into `[1, page_count]`.
    ///
    /// A document always has at least one page by the time this is called;
    /// a zero count still resolves to page 1.
    pub fn resolve(&self, page_count: usize) -> usize {
        let last = page_count.max(1);
        match self {
            PageSelector::Last => last,
            PageSelector::Number(n) => (*n as usize).clamp(1, last),
        }
    }
}

/// Visible signature placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleLayout {
    /// Lower-left x
    pub llx: u32,
    /// Lower-left y
    pub lly: u32,
    /// Upper-right x
    pub urx: u32,
    /// Upper-right y
    pub ury: u32,
    /// Target page
    pub page: PageSelector,
    /// Signature image, base64 encoded
    pub image: String,
}

impl VisibleLayout {
    /// Raw image bytes.
    pub fn image_bytes(&self) -> crate::error::Result<Vec<u8>> {
        STANDARD
            .decode(self.image.as_bytes())
            .map_err(|e| crate::error::Error::Image(format!("invalid base64 image payload: {}", e)))
    }

    /// Rectangle with normalized corners: `(llx, lly, urx, ury)`.
    pub fn rect(&self) -> (f64, f64, f64, f64) {
        (
            self.llx.min(self.urx) as f64,
            self.lly.min(self.ury) as f64,
            self.llx.max(self.urx) as f64,
            self.lly.max(self.ury) as f64,
        )
    }
}

/// How the signature is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutDescriptor {
    /// No appearance on any page
    Invisible,
    /// Image placed in a rectangle on a page
    Visible(VisibleLayout),
}

impl LayoutDescriptor {
    /// Layout for an invisible signature.
    pub fn invisible() -> Self {
        LayoutDescriptor::Invisible
    }

    /// Layout for a visible signature.
    ///
    /// Negative coordinates are clamped to 0 and a page `<= 0` selects the
    /// last page.
    pub fn visible(llx: i32, lly: i32, urx: i32, ury: i32, page: i32, image: &[u8]) -> Self {
        LayoutDescriptor::Visible(VisibleLayout {
            llx: clamp_coordinate(llx),
            lly: clamp_coordinate(lly),
            urx: clamp_coordinate(urx),
            ury: clamp_coordinate(ury),
            page: PageSelector::from_request(page),
            image: STANDARD.encode(image),
        })
    }

    /// True for [`LayoutDescriptor::Visible`].
    pub fn is_visible(&self) -> bool {
        matches!(self, LayoutDescriptor::Visible(_))
    }
}

fn clamp_coordinate(value: i32) -> u32 {
    value.max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_visible_clamps_negative_coordinates() {
        let layout = LayoutDescriptor::visible(-5, -1, 100, 200, 0, b"img");
        match layout {
            LayoutDescriptor::Visible(v) => {
                assert_eq!((v.llx, v.lly, v.urx, v.ury), (0, 0, 100, 200));
                assert_eq!(v.page, PageSelector::Last);
                assert_eq!(v.image_bytes().unwrap(), b"img");
            },
            LayoutDescriptor::Invisible => panic!("expected a visible layout"),
        }
    }

    #[test]
    fn test_invisible() {
        assert!(!LayoutDescriptor::invisible().is_visible());
    }

    #[test]
    fn test_page_resolution() {
        assert_eq!(PageSelector::Last.resolve(7), 7);
        assert_eq!(PageSelector::Number(3).resolve(7), 3);
        assert_eq!(PageSelector::Number(12).resolve(7), 7);
        assert_eq!(PageSelector::from_request(-3), PageSelector::Last);
        assert_eq!(PageSelector::from_request(2), PageSelector::Number(2));
    }

    #[test]
    fn test_rect_normalizes_corners() {
        let layout = VisibleLayout {
            llx: 300,
            lly: 80,
            urx: 100,
            ury: 20,
            page: PageSelector::Number(1),
            image: String::new(),
        };
        assert_eq!(layout.rect(), (100.0, 20.0, 300.0, 80.0));
    }

    proptest! {
        #[test]
        fn prop_coordinates_never_negative(
            llx in any::<i32>(), lly in any::<i32>(), urx in any::<i32>(), ury in any::<i32>(), page in any::<i32>()
        ) {
            if let LayoutDescriptor::Visible(v) = LayoutDescriptor::visible(llx, lly, urx, ury, page, &[]) {
                prop_assert_eq!(v.llx, llx.max(0) as u32);
                prop_assert_eq!(v.ury, ury.max(0) as u32);
                prop_assert_eq!(v.page == PageSelector::Last, page <= 0);
            }
        }

        #[test]
        fn prop_resolved_page_in_range(page in any::<i32>(), count in 1usize..500) {
            let resolved = PageSelector::from_request(page).resolve(count);
            prop_assert!(resolved >= 1 && resolved <= count);
        }
    }
}
