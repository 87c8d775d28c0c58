pub mod fil_header;
pub mod index_page;
pub mod zip;

pub use fil_header::{
    page_checksum, page_lsn, set_page_lsn, stamp_checksum, verify_checksum, FilHeader, PageType,
    FIL_PAGE_DATA, FIL_PAGE_LSN,
};
pub use index_page::{
    delete_mark, init_index_page, insert_record_bytes, rebuild_index_page, reorganize, IndexPage,
    PageRecord, PAGE_DATA,
};
pub use zip::{unzip_page, zip_page, ZipPage};
