use std::sync::Arc;

use pretty_assertions::assert_eq;
use uvm_hwref::class::{ARCH_GA100, ARCH_GH100, ARCH_GP100, SUBCHANNEL_CE, SUBCHANNEL_HOST};
use uvm_hwref::host::c06f;
use uvm_hwref::mmu::{PAGE_SIZE_2M, PAGE_SIZE_4K, PAGE_SIZE_512M, PAGE_SIZE_64K};

use super::*;
use crate::arch;
use crate::mmu::{Prot, PteFlags};
use crate::push::{ChannelConfig, Method};

const VID: (u64, u64) = (0x100_0000, 0x200_0000);
const SYS: (u64, u64) = (0x8000_0000, 0x8100_0000);

fn begin(gpu: &Arc<GpuHal>) -> Push {
    Push::begin(Arc::clone(gpu), &ChannelConfig::kernel("page-tree", 0x10_0000))
}

fn tree_with(arch_id: u32, location: PageTableLocation, vid: (u64, u64)) -> (Arc<GpuHal>, PageTree) {
    let gpu = arch::test_gpu(arch_id);
    let mut push = begin(&gpu);
    let tree = PageTree::new(
        &mut push,
        PAGE_SIZE_64K,
        PageTreeKind::User,
        location,
        AtsConfig::default(),
        Box::new(LinearAllocator::new(vid, SYS)),
    )
    .unwrap();
    push.end().unwrap();
    (gpu, tree)
}

fn fresh(arch_id: u32) -> (Arc<GpuHal>, PageTree) {
    tree_with(arch_id, PageTableLocation::Default, VID)
}

/// `(MEM_OP_C, MEM_OP_D)` of every TLB invalidate, plus the index of the last one among all
/// methods.
fn invalidates(methods: &[Method]) -> Vec<(usize, u32, u32)> {
    methods
        .iter()
        .enumerate()
        .filter(|(_, m)| m.subchannel == SUBCHANNEL_HOST && m.address == c06f::MEM_OP_A && m.data.len() == 4)
        .filter(|(_, m)| {
            c06f::MEM_OP_D_OPERATION.get32(m.data[3]) == c06f::MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE
        })
        .map(|(i, m)| (i, m.data[2], m.data[3]))
        .collect()
}

#[test]
fn first_mapping_builds_the_whole_path() {
    let (gpu, mut tree) = fresh(ARCH_GP100);
    assert_eq!(tree.directory_count(), 1);

    let mut push = begin(&gpu);
    let range = tree.get_ptes(&mut push, PAGE_SIZE_4K, 0x1_0000_3000, 2 * PAGE_SIZE_4K).unwrap();
    assert_eq!(tree.directory_count(), 5);
    assert_eq!(range.start_index, 3);
    assert_eq!(range.entry_count, 2);
    assert_eq!(tree.directory(range.table).unwrap().depth, 4);
    assert_eq!(tree.directory(range.table).unwrap().ref_count, 2);

    let methods = push.end().unwrap().methods().unwrap();
    let inv = invalidates(&methods);
    assert_eq!(inv.len(), 1);
    let (at, c, _) = inv[0];
    // The root gained a child, so every cached level goes.
    assert_eq!(
        c06f::MEM_OP_C_TLB_INVALIDATE_PAGE_TABLE_LEVEL.get32(c),
        c06f::MEM_OP_C_TLB_INVALIDATE_PAGE_TABLE_LEVEL_ALL
    );
    let last_ce = methods.iter().rposition(|m| m.subchannel == SUBCHANNEL_CE).unwrap();
    assert!(last_ce < at, "directory writes must precede the invalidate");
}

#[test]
fn later_mappings_only_touch_what_is_new() {
    let (gpu, mut tree) = fresh(ARCH_GP100);
    let mut push = begin(&gpu);
    tree.get_ptes(&mut push, PAGE_SIZE_4K, 0x20_0000, PAGE_SIZE_4K).unwrap();
    push.end().unwrap();

    let mut push = begin(&gpu);
    tree.get_ptes(&mut push, PAGE_SIZE_4K, 0x20_1000, PAGE_SIZE_4K).unwrap();
    assert!(push.words().is_empty());
    push.end().unwrap();

    // Next 2M region: one new PTE table under the existing PDE0 directory.
    let mut push = begin(&gpu);
    tree.get_ptes(&mut push, PAGE_SIZE_4K, 0x40_0000, PAGE_SIZE_4K).unwrap();
    assert_eq!(tree.directory_count(), 6);
    let inv = invalidates(&push.end().unwrap().methods().unwrap());
    assert_eq!(inv.len(), 1);
    assert_eq!(
        c06f::MEM_OP_C_TLB_INVALIDATE_PAGE_TABLE_LEVEL.get32(inv[0].1),
        c06f::MEM_OP_C_TLB_INVALIDATE_PAGE_TABLE_LEVEL_UP_TO_PDE0
    );
}

#[test]
fn putting_the_last_pte_releases_empty_directories() {
    let (gpu, mut tree) = fresh(ARCH_GP100);
    let mut push = begin(&gpu);
    let a = tree.get_ptes(&mut push, PAGE_SIZE_4K, 0x20_0000, PAGE_SIZE_4K).unwrap();
    let b = tree.get_ptes(&mut push, PAGE_SIZE_4K, 0x20_1000, PAGE_SIZE_4K).unwrap();
    push.end().unwrap();

    let mut push = begin(&gpu);
    tree.put_ptes(&mut push, &a).unwrap();
    assert_eq!(tree.directory_count(), 5);
    assert!(push.words().is_empty());

    tree.put_ptes(&mut push, &b).unwrap();
    assert_eq!(tree.directory_count(), 1);
    assert_eq!(tree.directory(tree.root).unwrap().ref_count, 0);
    assert_eq!(invalidates(&push.end().unwrap().methods().unwrap()).len(), 1);

    let mut push = begin(&gpu);
    assert!(matches!(
        tree.put_ptes(&mut push, &b),
        Err(UvmError::InvalidState(_)) | Err(UvmError::AssertionViolation(_))
    ));
}

#[test]
fn bad_ranges_are_rejected_without_side_effects() {
    let (gpu, mut tree) = fresh(ARCH_GP100);
    let mut push = begin(&gpu);

    let err = tree.get_ptes(&mut push, PAGE_SIZE_4K, 0x1800, PAGE_SIZE_4K).unwrap_err();
    assert!(matches!(err, UvmError::AssertionViolation(_)));
    let err = tree.get_ptes(&mut push, PAGE_SIZE_512M, 0, PAGE_SIZE_512M).unwrap_err();
    assert!(matches!(err, UvmError::UnsupportedConfiguration(_)));
    let err = tree.get_ptes(&mut push, PAGE_SIZE_4K, 1 << 49, PAGE_SIZE_4K).unwrap_err();
    assert!(matches!(err, UvmError::AssertionViolation(_)));

    // Crosses a 2M boundary, so two PTE tables would be needed.
    let err = tree.get_ptes(&mut push, PAGE_SIZE_4K, 0x1F_F000, 2 * PAGE_SIZE_4K).unwrap_err();
    assert!(matches!(err, UvmError::AssertionViolation(_)));
    assert_eq!(tree.directory_count(), 1);
    assert_eq!(tree.directory(tree.root).unwrap().ref_count, 0);
    assert!(push.words().is_empty());
}

#[test]
fn exhausted_video_memory_falls_back_to_sysmem() {
    // Room for the root and one more 4K directory.
    let (gpu, mut tree) = tree_with(ARCH_GP100, PageTableLocation::Default, (0x100_0000, 0x100_2000));
    let mut push = begin(&gpu);
    let range = tree.get_ptes(&mut push, PAGE_SIZE_4K, 0, PAGE_SIZE_4K).unwrap();
    assert_eq!(tree.directory(range.table).unwrap().phys.aperture, Aperture::Sys);
    assert_eq!(tree.pdb().unwrap().aperture, Aperture::Vid);
    push.end().unwrap();
}

#[test]
fn exhausted_video_memory_without_fallback_rolls_back() {
    let (gpu, mut tree) = tree_with(ARCH_GP100, PageTableLocation::Vid, (0x100_0000, 0x100_2000));
    let mut push = begin(&gpu);
    let err = tree.get_ptes(&mut push, PAGE_SIZE_4K, 0, PAGE_SIZE_4K).unwrap_err();
    assert_eq!(err, UvmError::OutOfMemory);
    assert_eq!(tree.directory_count(), 1);
    assert_eq!(tree.directory(tree.root).unwrap().ref_count, 0);
}

#[test]
fn dual_entries_split_big_and_small_tables() {
    let (gpu, mut tree) = fresh(ARCH_GP100);
    let mut push = begin(&gpu);
    let small = tree.get_ptes(&mut push, PAGE_SIZE_4K, 0x20_0000, PAGE_SIZE_4K).unwrap();
    let big = tree.get_ptes(&mut push, PAGE_SIZE_64K, 0x21_0000, PAGE_SIZE_64K).unwrap();
    push.end().unwrap();
    assert_ne!(small.table, big.table);

    let small_dir = tree.directory(small.table).unwrap();
    let big_dir = tree.directory(big.table).unwrap();
    assert_eq!(small_dir.parent, big_dir.parent);
    assert_eq!(big_dir.size, 256);

    let parent = tree.directory(small_dir.parent.unwrap()).unwrap();
    assert_eq!(parent.ref_count, 2);
    let index = small_dir.index_in_parent as usize;
    assert_eq!(parent.entries[index * 2], Some(big.table));
    assert_eq!(parent.entries[index * 2 + 1], Some(small.table));

    // 2M PTEs live in the big half of PDE0 itself.
    let mut push = begin(&gpu);
    let huge = tree.get_ptes(&mut push, PAGE_SIZE_2M, 0x60_0000, PAGE_SIZE_2M).unwrap();
    push.end().unwrap();
    assert_eq!(tree.directory(huge.table).unwrap().depth, 3);
    let first = tree.range_entry_address(&huge, huge.start_index).unwrap();
    let dir = tree.directory(huge.table).unwrap();
    assert_eq!(first.address - dir.phys.address, u64::from(huge.start_index) * 16);
}

#[test]
fn writes_land_on_the_range_entries() {
    let (gpu, mut tree) = fresh(ARCH_GP100);
    let mut push = begin(&gpu);
    let range = tree.get_ptes(&mut push, PAGE_SIZE_4K, 0x20_2000, 3 * PAGE_SIZE_4K).unwrap();
    push.end().unwrap();

    let mode = tree.mode();
    let ptes: Vec<u64> = (0..3)
        .map(|i| {
            mode.make_pte(Aperture::Vid, 0x4000_0000 + i * 0x1000, Prot::ReadWrite, PteFlags::CACHED)
                .unwrap()
        })
        .collect();
    let mut push = begin(&gpu);
    tree.write_ptes(&mut push, &range, &ptes).unwrap();
    let writes: Vec<(u32, u32)> = push
        .end()
        .unwrap()
        .methods()
        .unwrap()
        .iter()
        .filter(|m| m.subchannel == SUBCHANNEL_CE)
        .flat_map(|m| m.writes().collect::<Vec<_>>())
        .collect();
    let dst = tree.range_entry_address(&range, range.start_index).unwrap();
    assert!(writes.contains(&(uvm_hwref::ce::OFFSET_OUT_LOWER, dst.address as u32)));
    assert!(writes.contains(&(uvm_hwref::ce::LINE_LENGTH_IN, 24)));

    let mut push = begin(&gpu);
    assert!(tree.write_ptes(&mut push, &range, &ptes[..2]).is_err());
    tree.clear_ptes(&mut push, &range).unwrap();
    push.end().unwrap();
}

#[test]
fn huge_pages_map_from_the_ats_level() {
    let (gpu, mut tree) = fresh(ARCH_GA100);
    let mut push = begin(&gpu);
    let range = tree.get_ptes(&mut push, PAGE_SIZE_512M, 0x4000_0000, PAGE_SIZE_512M).unwrap();
    push.end().unwrap();
    assert_eq!(tree.directory(range.table).unwrap().depth, 2);
    assert_eq!(range.start_index, 2);
    assert_eq!(tree.directory_count(), 3);

    let (gpu, mut tree) = fresh(ARCH_GH100);
    let mut push = begin(&gpu);
    let range = tree.get_ptes(&mut push, PAGE_SIZE_512M, 0x4000_0000, PAGE_SIZE_512M).unwrap();
    push.end().unwrap();
    assert_eq!(tree.directory(range.table).unwrap().depth, 3);
    assert_eq!(tree.directory_count(), 4);
}

#[test]
fn teardown_requires_an_empty_root() {
    let (gpu, mut tree) = fresh(ARCH_GP100);
    let mut push = begin(&gpu);
    let range = tree.get_ptes(&mut push, PAGE_SIZE_4K, 0, PAGE_SIZE_4K).unwrap();
    tree.put_ptes(&mut push, &range).unwrap();
    tree.deinit(&mut push).unwrap();
    push.end().unwrap();

    let (gpu, mut tree) = fresh(ARCH_GP100);
    let mut push = begin(&gpu);
    tree.get_ptes(&mut push, PAGE_SIZE_4K, 0, PAGE_SIZE_4K).unwrap();
    assert!(matches!(tree.deinit(&mut push), Err(UvmError::InvalidState(_))));
}
